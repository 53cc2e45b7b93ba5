// Task chat message records
// Collection: task_messages/{id}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File stored by the attachment service and referenced from a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredAttachment {
    pub uri: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// Denormalized author snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SenderRef {
    pub id: String,
    pub name: String,
}

/// A message posted in a task's chat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub id: String,
    pub task_id: String,
    /// May be a single space when only attachments were sent
    pub message: String,
    pub sender_id: String,
    pub sender: SenderRef,
    #[serde(with = "super::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<StoredAttachment>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub read_by: Vec<String>,
    /// Idempotency key generated by the client for its optimistic copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

/// Document id for a new message. A client key maps to the same id on every
/// retry, so the store can refuse the second insert.
pub fn task_message_id(task_id: &str, client_message_id: Option<&str>) -> String {
    match client_message_id {
        Some(key) => hex::encode(Sha256::digest(format!("{}:{}", task_id, key).as_bytes())),
        None => uuid::Uuid::new_v4().to_string(),
    }
}
