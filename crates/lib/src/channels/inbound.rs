//! Inbound event from a channel webhook: lives for one dispatch only.

/// A decoded message event the dispatcher knows how to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text {
        sender_id: String,
        reply_token: String,
        text: String,
    },
    Image {
        sender_id: String,
        reply_token: String,
        media_id: String,
    },
}

impl InboundEvent {
    pub fn sender_id(&self) -> &str {
        match self {
            InboundEvent::Text { sender_id, .. } | InboundEvent::Image { sender_id, .. } => {
                sender_id
            }
        }
    }

    /// One-time token for the synchronous reply to this event.
    pub fn reply_token(&self) -> &str {
        match self {
            InboundEvent::Text { reply_token, .. } | InboundEvent::Image { reply_token, .. } => {
                reply_token
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Text { .. } => "text",
            InboundEvent::Image { .. } => "image",
        }
    }
}
