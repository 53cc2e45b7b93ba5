// Chat message shapes held by the client session
// Server records are normalized into ChatMessage on receipt

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::lenient;

/// Local lifecycle tag for a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

impl Default for MessageStatus {
    fn default() -> Self {
        MessageStatus::Delivered
    }
}

/// Attachment reference: either a bare URL or a file descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Attachment {
    Url(String),
    File {
        uri: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, rename = "type")]
        mime_type: Option<String>,
    },
}

impl Attachment {
    pub fn file(uri: impl Into<String>, name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Attachment::File {
            uri: uri.into(),
            name: Some(name.into()),
            mime_type: Some(mime_type.into()),
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Attachment::Url(url) => url,
            Attachment::File { uri, .. } => uri,
        }
    }

    /// Display name, falling back to the last path segment of the uri
    pub fn name(&self) -> &str {
        match self {
            Attachment::File { name: Some(name), .. } if !name.is_empty() => name.as_str(),
            other => other.uri().rsplit('/').next().unwrap_or("attachment"),
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Attachment::Url(_) => None,
            Attachment::File { mime_type, .. } => mime_type.as_deref(),
        }
    }

    /// Remote attachments are re-sent by URL, local ones are uploaded
    pub fn is_remote(&self) -> bool {
        let uri = self.uri();
        uri.starts_with("http://") || uri.starts_with("https://")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SenderName {
    pub name: String,
}

/// A message as shown in the chat view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    /// Resolved user ids, unique, in order of first mention
    pub mentions: Vec<String>,
    pub user_id: String,
    pub sender: SenderName,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub is_temp: bool,
    /// Idempotency key shared with the server copy of this send
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
}

impl ChatMessage {
    /// Optimistic copy of an outgoing message
    pub fn temp(
        text: String,
        attachments: Vec<Attachment>,
        mentions: Vec<String>,
        user_id: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: temp_message_id(created_at),
            text,
            attachments,
            mentions,
            user_id,
            sender: SenderName {
                name: "You".to_string(),
            },
            created_at,
            status: MessageStatus::Sending,
            is_temp: true,
            client_key: Some(uuid::Uuid::new_v4().to_string()),
        }
    }
}

/// Temporary id: temp_<unix millis>_<9 random alphanumerics>
pub fn temp_message_id(at: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("temp_{}_{}", at.timestamp_millis(), suffix)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSender {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Message record as returned by the task messages endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessageRecord {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "userId", deserialize_with = "lenient::opt_id")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender: Option<ServerSender>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, deserialize_with = "lenient::id_list")]
    pub mentions: Vec<String>,
    #[serde(default, deserialize_with = "lenient::id_list")]
    pub read_by: Vec<String>,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

impl ServerMessageRecord {
    pub fn into_chat_message(self) -> ChatMessage {
        let sender = self.sender.unwrap_or_default();
        let user_id = self.sender_id.or(sender.id).unwrap_or_default();
        let name = sender
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("User {}", user_id));

        // Attachment-only sends carry a single space placeholder
        let text = self
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_default();

        ChatMessage {
            id: self.id,
            text,
            attachments: self.attachments.unwrap_or_default(),
            mentions: self.mentions,
            user_id,
            sender: SenderName { name },
            created_at: self.created_at,
            status: MessageStatus::Delivered,
            is_temp: false,
            client_key: self.client_message_id,
        }
    }
}
