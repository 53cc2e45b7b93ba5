// Task chat engine (client side)
// Mention resolution, optimistic sends, and reconciliation with the
// server's confirmed history for one task conversation

pub mod mentions;
pub mod message;
pub mod reconcile;
pub mod session;
pub mod transport;

use thiserror::Error;

pub use mentions::{Fragment, MentionMap, MentionRole, MentionableUser, TaskSnapshot};
pub use message::{Attachment, ChatMessage, MessageStatus, ServerMessageRecord};
pub use session::{ChatSession, CurrentUser};
pub use transport::{ChatTransport, HttpChatTransport, OutgoingMessage};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message text or at least one attachment is required")]
    EmptyMessage,

    #[error("Send failed: {0}")]
    Transport(String),

    #[error("Attachment {name} could not be sent: {reason}")]
    Attachment { name: String, reason: String },

    #[error("Unknown message {0}")]
    UnknownMessage(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}
