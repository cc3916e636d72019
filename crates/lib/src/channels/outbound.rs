use crate::channels::ChannelError;
use async_trait::async_trait;

/// Outbound calls to the messaging platform. Credentials are passed per call, never captured.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Download the binary content of a media message (e.g. an image).
    async fn fetch_content(&self, access_token: &str, media_id: &str)
        -> Result<Vec<u8>, ChannelError>;

    /// Reply to an event with a single text message.
    async fn reply_text(
        &self,
        access_token: &str,
        reply_token: &str,
        text: &str,
    ) -> Result<(), ChannelError>;
}
