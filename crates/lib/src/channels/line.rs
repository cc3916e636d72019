//! LINE Messaging API: webhook signature, event decoding, content download, and reply.

use crate::channels::inbound::InboundEvent;
use crate::channels::outbound::MessagingGateway;
use crate::channels::ChannelError;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

const LINE_API_BASE: &str = "https://api.line.me";
const LINE_DATA_API_BASE: &str = "https://api-data.line.me";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// LINE rejects text messages longer than this many characters.
pub const MAX_REPLY_CHARS: usize = 5000;

type HmacSha256 = Hmac<Sha256>;

fn keyed_mac(channel_secret: &str) -> Option<HmacSha256> {
    match HmacSha256::new_from_slice(channel_secret.as_bytes()) {
        Ok(m) => Some(m),
        Err(_) => {
            log::warn!("failed to create HMAC");
            None
        }
    }
}

/// Base64 HMAC-SHA256 of the body keyed by the channel secret, as sent in `X-Line-Signature`.
pub fn signature_for(channel_secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = keyed_mac(channel_secret)?;
    mac.update(body);
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check the `X-Line-Signature` header against the raw body. Comparison is constant-time.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = match base64::engine::general_purpose::STANDARD.decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => {
            log::debug!("signature header is not valid base64");
            return false;
        }
    };
    let Some(mut mac) = keyed_mac(channel_secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    destination: Option<String>,
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    reply_token: Option<String>,
    #[serde(default)]
    source: Option<EventSource>,
    #[serde(default)]
    message: Option<EventMessage>,
    #[serde(default)]
    webhook_event_id: Option<String>,
    #[serde(default)]
    delivery_context: Option<DeliveryContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventSource {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryContext {
    #[serde(default)]
    is_redelivery: bool,
}

/// Decode a webhook body into the events the relay answers (text and image messages).
/// Other event and message types are skipped. The body must already be signature-checked.
pub fn decode_events(body: &[u8]) -> Result<Vec<InboundEvent>, ChannelError> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    log::debug!(
        "webhook for destination {} with {} event(s)",
        payload.destination.as_deref().unwrap_or("-"),
        payload.events.len()
    );
    let mut out = Vec::new();
    for event in payload.events {
        if event.delivery_context.as_ref().is_some_and(|d| d.is_redelivery) {
            log::info!(
                "line: redelivered event {}",
                event.webhook_event_id.as_deref().unwrap_or("-")
            );
        }
        if event.typ != "message" {
            log::debug!("line: skipping {} event", event.typ);
            continue;
        }
        let (Some(reply_token), Some(message)) = (event.reply_token, event.message) else {
            log::debug!("line: message event without reply token or message, skipping");
            continue;
        };
        let Some(sender_id) = event.source.and_then(|s| s.user_id) else {
            log::debug!("line: message event without user id, skipping");
            continue;
        };
        match message.typ.as_str() {
            "text" => out.push(InboundEvent::Text {
                sender_id,
                reply_token,
                text: message.text.unwrap_or_default(),
            }),
            "image" => out.push(InboundEvent::Image {
                sender_id,
                reply_token,
                media_id: message.id,
            }),
            other => log::debug!("line: skipping {} message", other),
        }
    }
    Ok(out)
}

/// Cut `text` to at most [`MAX_REPLY_CHARS`] characters.
pub fn truncate_reply(text: &str) -> &str {
    match text.char_indices().nth(MAX_REPLY_CHARS) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// HTTP client for the LINE Messaging API. One instance serves every tenant.
#[derive(Clone)]
pub struct LineClient {
    api_base: String,
    data_api_base: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl LineClient {
    pub fn new(api_base: Option<String>, data_api_base: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| LINE_API_BASE.to_string());
        let data_api_base = data_api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| LINE_DATA_API_BASE.to_string());
        Self {
            api_base,
            data_api_base,
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MessagingGateway for LineClient {
    /// GET /v2/bot/message/{id}/content on the data API host.
    async fn fetch_content(
        &self,
        access_token: &str,
        media_id: &str,
    ) -> Result<Vec<u8>, ChannelError> {
        let url = format!("{}/v2/bot/message/{}/content", self.data_api_base, media_id);
        let res = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("get content failed: {} {}", status, body)));
        }
        Ok(res.bytes().await?.to_vec())
    }

    /// POST /v2/bot/message/reply with one text message.
    async fn reply_text(
        &self,
        access_token: &str,
        reply_token: &str,
        text: &str,
    ) -> Result<(), ChannelError> {
        let url = format!("{}/v2/bot/message/reply", self.api_base);
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": [{ "type": "text", "text": truncate_reply(text) }],
        });
        let res = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("reply failed: {} {}", status, body)));
        }
        Ok(())
    }
}
