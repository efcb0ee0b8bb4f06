pub mod push;
pub mod team_chat;

pub use push::PushChannel;
pub use team_chat::TeamChatChannel;

use async_trait::async_trait;
use thiserror::Error;

use super::formatting::MessagePayload;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ChannelError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("recipient is not reachable on this channel")]
    RecipientUnreachable,

    #[error("payload could not be encoded for this channel: {0}")]
    Encoding(String),
}

/// A single outbound message channel (push notification, team-chat webhook, ...). Each
/// implementation owns its own formatting and its own minimum-config gate.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, payload: &MessagePayload, recipient_handle: &str) -> Result<(), ChannelError>;
}
