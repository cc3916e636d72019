//! Per-request context: deadline, cancellation, and the public server root.
//!
//! Built once per webhook call. The AI round-trip and attachment staging stop when its
//! deadline passes or the server shuts down.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    server_root: String,
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Context that expires `timeout` from now. `cancel` is usually a child of the server
    /// shutdown token.
    pub fn new(
        server_root: impl Into<String>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id: format!("req-{}", uuid::Uuid::new_v4()),
            server_root: server_root.into().trim_end_matches('/').to_string(),
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Public root without trailing slash (e.g. "https://relay.example.com").
    pub fn server_root(&self) -> &str {
        &self.server_root
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Completes when the request is cancelled (e.g. server shutdown).
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trims_root_and_follows_parent_cancel() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(
            "https://relay.example.com/",
            Duration::from_secs(30),
            token.child_token(),
        );
        assert_eq!(ctx.server_root(), "https://relay.example.com");
        assert!(ctx.request_id().starts_with("req-"));
        assert!(ctx.deadline() <= Instant::now() + Duration::from_secs(30));

        let pending = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(pending.is_err());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .unwrap();
    }
}
