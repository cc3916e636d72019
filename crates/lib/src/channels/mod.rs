//! Messaging channel (LINE): webhook signature check, event decoding, replies.
//!
//! Decoding and verification are pure functions; outbound calls go through the
//! [`MessagingGateway`] trait so the dispatcher can run against a fake in tests.

mod inbound;
mod line;
mod outbound;

pub use inbound::InboundEvent;
pub use line::{
    decode_events, signature_for, truncate_reply, verify_signature, LineClient, MAX_REPLY_CHARS,
};
pub use outbound::MessagingGateway;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("webhook body could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("line request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("line api error: {0}")]
    Api(String),
}
