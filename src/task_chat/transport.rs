// Chat transport - talks to the task messages endpoints

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::path::Path;
use std::time::Duration;

use super::message::{Attachment, ChatMessage, ServerMessageRecord};
use super::ChatError;
use crate::services::attachments::normalize_mime;

/// Placeholder text sent when a message only carries attachments
pub const ATTACHMENT_ONLY_PLACEHOLDER: &str = " ";

/// Everything the server needs for one send
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub task_id: String,
    pub temp_id: String,
    pub client_key: String,
    pub text: String,
    pub mentions: Vec<String>,
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    /// Value of the `message` form field
    pub fn wire_text(&self) -> &str {
        if self.text.trim().is_empty() {
            ATTACHMENT_ONLY_PLACEHOLDER
        } else {
            &self.text
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn fetch_messages(&self, task_id: &str) -> Result<Vec<ChatMessage>, ChatError>;

    async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<ChatMessage, ChatError>;
}

/// HTTP transport using bearer auth and multipart sends
pub struct HttpChatTransport {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpChatTransport {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn messages_url(&self, task_id: &str) -> String {
        format!(
            "{}/api/tasks/{}/messages",
            self.base_url,
            urlencoding::encode(task_id)
        )
    }

    async fn attachment_part(attachment: &Attachment) -> Result<Part, ChatError> {
        let name = attachment.name().to_string();
        let path = attachment.uri().strip_prefix("file://").unwrap_or(attachment.uri());
        let data = tokio::fs::read(Path::new(path))
            .await
            .map_err(|e| ChatError::Attachment {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let mime = normalize_mime(attachment.mime_type(), &name);

        Part::bytes(data)
            .file_name(name.clone())
            .mime_str(&mime)
            .map_err(|e| ChatError::Attachment {
                name,
                reason: e.to_string(),
            })
    }

    async fn build_form(outgoing: &OutgoingMessage) -> Result<Form, ChatError> {
        let mut form = Form::new()
            .text("taskId", outgoing.task_id.clone())
            .text("message", outgoing.wire_text().to_string())
            .text("clientMessageId", outgoing.client_key.clone());

        for mention in &outgoing.mentions {
            form = form.text("mentions[]", mention.clone());
        }
        for attachment in &outgoing.attachments {
            if attachment.is_remote() {
                form = form.text("attachmentUrls[]", attachment.uri().to_string());
            } else {
                form = form.part("attachments", Self::attachment_part(attachment).await?);
            }
        }
        Ok(form)
    }
}

async fn check_status(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Transport(format!("server returned {}: {}", status, body)))
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn fetch_messages(&self, task_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let response = self
            .client
            .get(self.messages_url(task_id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let records: Vec<ServerMessageRecord> = check_status(response).await?.json().await?;
        Ok(records
            .into_iter()
            .map(ServerMessageRecord::into_chat_message)
            .collect())
    }

    async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<ChatMessage, ChatError> {
        let form = Self::build_form(outgoing).await?;
        let response = self
            .client
            .post(self.messages_url(&outgoing.task_id))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let record: ServerMessageRecord = check_status(response).await?.json().await?;

        tracing::info!(
            "Sent message {} on task {} (server id {})",
            outgoing.temp_id,
            outgoing.task_id,
            record.id
        );
        Ok(record.into_chat_message())
    }
}
