//! AI backend: request types and the Coze streaming chat client.
//!
//! The dispatcher talks to [`AiBackend`]; [`CozeClient`] is the production implementation.

mod coze;

pub use coze::{extract_fragment, CozeClient};

use crate::context::RequestContext;
use async_trait::async_trait;
use serde::Serialize;

/// One part of a multi-part (object) message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Image { file_url: String },
    Text { text: String },
}

/// Message content sent to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiContent {
    Text(String),
    Object(Vec<ContentPart>),
}

impl AiContent {
    /// Wire `content_type` for this content.
    pub fn content_type(&self) -> &'static str {
        match self {
            AiContent::Text(_) => "text",
            AiContent::Object(_) => "object_string",
        }
    }
}

/// A single chat turn for one bot and one end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRequest {
    pub bot_id: String,
    pub user_id: String,
    pub content: AiContent,
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("ai request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ai backend returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("ai request could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Streaming chat round-trip. Always yields reply text: failures degrade to a fallback reply.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn converse(&self, ctx: &RequestContext, api_key: &str, request: &AiRequest) -> String;
}
