mod telegram;
mod templates;

pub use telegram::{Chat, IncomingMessage, TelegramClient, Update};
pub use templates::{escape_markdown, AlertTemplate};

use watch_core::DispatchError;

/// Errors from the chat transport.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Telegram API error: {0}")]
    Api(String),
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl From<NotificationError> for DispatchError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Http(msg) => DispatchError::Http(msg),
            NotificationError::Api(msg) | NotificationError::Decode(msg) => DispatchError::Rejected(msg),
        }
    }
}
