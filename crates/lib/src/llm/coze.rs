//! Coze v3 chat client (https://api.coze.com by default).
//! Streams server-sent lines and concatenates message content fragments.

use crate::context::RequestContext;
use crate::llm::{AiBackend, AiContent, AiError, AiRequest};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;

const DEFAULT_BASE_URL: &str = "https://api.coze.com";
const SSE_DATA_PREFIX: &str = "data:";

/// Client for the Coze chat API.
#[derive(Clone)]
pub struct CozeClient {
    base_url: String,
    fallback_reply: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    bot_id: &'a str,
    user_id: &'a str,
    stream: bool,
    auto_save_history: bool,
    additional_messages: Vec<AdditionalMessage>,
}

#[derive(Debug, Serialize)]
struct AdditionalMessage {
    role: &'static str,
    content: String,
    content_type: &'static str,
}

impl AdditionalMessage {
    fn user(content: &AiContent) -> Result<Self, AiError> {
        let content_type = content.content_type();
        let content = match content {
            AiContent::Text(text) => text.clone(),
            AiContent::Object(parts) => serde_json::to_string(parts)?,
        };
        Ok(Self {
            role: "user",
            content,
            content_type,
        })
    }
}

/// Content fragment carried by one stream line, or None when the line should not contribute.
///
/// Only `data:` lines count. Their payload must be a JSON object with a string `content`;
/// content that itself starts with `{` is a structural/control message and is dropped.
/// Lines that are not valid JSON are logged and skipped.
pub fn extract_fragment(line: &str) -> Option<String> {
    let data = line.strip_prefix(SSE_DATA_PREFIX)?;
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("coze: failed to decode stream line ({}): {}", e, line);
            return None;
        }
    };
    let content = value.get("content")?.as_str()?;
    if content.starts_with('{') {
        return None;
    }
    Some(content.to_string())
}

impl CozeClient {
    pub fn new(base_url: Option<String>, fallback_reply: impl Into<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            fallback_reply: fallback_reply.into(),
            client: reqwest::Client::new(),
        }
    }

    /// POST /v3/chat with stream: true. Reads newline-delimited SSE and accumulates fragments until the body ends.
    async fn stream_reply(&self, api_key: &str, request: &AiRequest) -> Result<String, AiError> {
        let url = format!("{}/v3/chat", self.base_url);
        let body = ChatRequest {
            bot_id: &request.bot_id,
            user_id: &request.user_id,
            stream: true,
            auto_save_history: true,
            additional_messages: vec![AdditionalMessage::user(&request.content)?],
        };
        log::debug!(
            "coze: chat request for bot {} user {} ({})",
            request.bot_id,
            request.user_id,
            request.content.content_type()
        );
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        if res.status() != reqwest::StatusCode::OK {
            return Err(AiError::Status(res.status()));
        }
        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            while let Some(i) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..i).collect();
                buffer.drain(..1);
                push_line(&mut reply, &line_bytes);
            }
        }
        if !buffer.is_empty() {
            push_line(&mut reply, &buffer);
        }
        Ok(reply)
    }
}

fn push_line(reply: &mut String, line_bytes: &[u8]) {
    let line = String::from_utf8_lossy(line_bytes);
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return;
    }
    if let Some(fragment) = extract_fragment(line) {
        reply.push_str(&fragment);
    }
}

#[async_trait]
impl AiBackend for CozeClient {
    /// Bounded by the context deadline and cancelled with it; any failure yields the fallback reply.
    async fn converse(&self, ctx: &RequestContext, api_key: &str, request: &AiRequest) -> String {
        let round_trip =
            tokio::time::timeout_at(ctx.deadline(), self.stream_reply(api_key, request));
        let outcome = tokio::select! {
            _ = ctx.cancelled() => {
                log::warn!("coze: {} cancelled before the reply completed", ctx.request_id());
                return self.fallback_reply.clone();
            }
            outcome = round_trip => outcome,
        };
        match outcome {
            Ok(Ok(reply)) => {
                log::info!(
                    "coze: {} received {} char reply",
                    ctx.request_id(),
                    reply.chars().count()
                );
                reply
            }
            Ok(Err(e)) => {
                log::warn!("coze: {} failed to get a response: {}", ctx.request_id(), e);
                self.fallback_reply.clone()
            }
            Err(_) => {
                log::warn!("coze: {} deadline exceeded", ctx.request_id());
                self.fallback_reply.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ContentPart;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const FALLBACK: &str = "unable to obtain a response from the AI backend";

    fn ctx(timeout: Duration) -> RequestContext {
        RequestContext::new("http://localhost", timeout, CancellationToken::new())
    }

    fn text_request(text: &str) -> AiRequest {
        AiRequest {
            bot_id: "bot-1".to_string(),
            user_id: "U123".to_string(),
            content: AiContent::Text(text.to_string()),
        }
    }

    #[test]
    fn fragment_from_data_line() {
        assert_eq!(extract_fragment(r#"data: {"content":"hello"}"#).as_deref(), Some("hello"));
        assert_eq!(extract_fragment(r#"data:{"content":"hi"}"#).as_deref(), Some("hi"));
    }

    #[test]
    fn structural_content_is_dropped() {
        assert_eq!(extract_fragment(r#"data: {"content":"{\"msg_type\":\"verbose\"}"}"#), None);
    }

    #[test]
    fn non_data_and_unparseable_lines_are_skipped() {
        assert_eq!(extract_fragment("event:conversation.message.delta"), None);
        assert_eq!(extract_fragment("data: not json"), None);
        assert_eq!(extract_fragment(r#"data:"[DONE]""#), None);
        assert_eq!(extract_fragment(r#"data: {"id":"x"}"#), None);
        assert_eq!(extract_fragment(r#"data: {"content":42}"#), None);
    }

    #[test]
    fn object_content_is_json_string() {
        let content = AiContent::Object(vec![
            ContentPart::Image {
                file_url: "http://h/static/a.jpg".to_string(),
            },
            ContentPart::Text {
                text: "what's in this picture".to_string(),
            },
        ]);
        let msg = AdditionalMessage::user(&content).unwrap();
        assert_eq!(msg.content_type, "object_string");
        let parsed: serde_json::Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([
                { "type": "image", "file_url": "http://h/static/a.jpg" },
                { "type": "text", "text": "what's in this picture" }
            ])
        );
    }

    #[tokio::test]
    async fn single_line_stream_yields_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/chat")
            .match_header("authorization", "Bearer pat_key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "bot_id": "bot-1",
                "user_id": "U123",
                "stream": true,
                "auto_save_history": true,
                "additional_messages": [
                    { "role": "user", "content": "hi", "content_type": "text" }
                ]
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"content\":\"hello\"}\n")
            .create_async()
            .await;
        let client = CozeClient::new(Some(server.url()), FALLBACK);
        let reply = client
            .converse(&ctx(Duration::from_secs(10)), "pat_key", &text_request("hi"))
            .await;
        assert_eq!(reply, "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn stream_aggregates_and_filters() {
        let body = concat!(
            "event:conversation.chat.created\n",
            "data:{\"id\":\"chat\",\"status\":\"created\"}\n",
            "\n",
            "event:conversation.message.delta\n",
            "data:{\"role\":\"assistant\",\"type\":\"answer\",\"content\":\"Hel\"}\r\n",
            "event:conversation.message.delta\n",
            "data:{\"role\":\"assistant\",\"type\":\"answer\",\"content\":\"lo\"}\n",
            "data: this is not json\n",
            "event:conversation.message.completed\n",
            "data:{\"type\":\"verbose\",\"content\":\"{\\\"msg_type\\\":\\\"generate_answer_finish\\\"}\"}\n",
            "event:done\n",
            "data:\"[DONE]\""
        );
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v3/chat")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        let client = CozeClient::new(Some(server.url()), FALLBACK);
        let reply = client
            .converse(&ctx(Duration::from_secs(10)), "k", &text_request("hi"))
            .await;
        assert_eq!(reply, "Hello");
    }

    #[tokio::test]
    async fn server_error_yields_fallback() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v3/chat")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let client = CozeClient::new(Some(server.url()), FALLBACK);
        let reply = client
            .converse(&ctx(Duration::from_secs(10)), "k", &text_request("hi"))
            .await;
        assert_eq!(reply, FALLBACK);
    }

    #[tokio::test]
    async fn unreachable_backend_yields_fallback() {
        let client = CozeClient::new(Some("http://127.0.0.1:1".to_string()), FALLBACK);
        let reply = client
            .converse(&ctx(Duration::from_secs(10)), "k", &text_request("hi"))
            .await;
        assert_eq!(reply, FALLBACK);
    }

    #[tokio::test]
    async fn cancelled_context_yields_fallback() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RequestContext::new("http://localhost", Duration::from_secs(10), token);
        let client = CozeClient::new(Some("http://127.0.0.1:1".to_string()), FALLBACK);
        assert_eq!(client.converse(&ctx, "k", &text_request("hi")).await, FALLBACK);
    }

    #[tokio::test]
    async fn expired_deadline_yields_fallback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer, so only the deadline can end the call.
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((sock, _)) = listener.accept().await {
                    held.push(sock);
                }
            }
        });
        let client = CozeClient::new(Some(format!("http://{}", addr)), FALLBACK);
        let reply = client
            .converse(&ctx(Duration::from_millis(200)), "k", &text_request("hi"))
            .await;
        assert_eq!(reply, FALLBACK);
    }
}
