// Task chat routes
// Endpoints:
// - GET  /api/tasks/:task_id/messages - Chat history, oldest first
// - POST /api/tasks/:task_id/messages - Multipart send (text, mentions, attachments)

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{task_message_id, SenderRef, StoredAttachment, TaskMessage};
use crate::services::attachments::{normalize_mime, AttachmentError};
use crate::services::store::MessageInsert;
use crate::AppState;

/// Fields collected from the multipart form
#[derive(Debug, Default)]
struct SendForm {
    task_id: Option<String>,
    message: String,
    mentions: Vec<String>,
    client_message_id: Option<String>,
    attachments: Vec<StoredAttachment>,
}

/// GET /api/tasks/:task_id/messages
async fn get_task_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<Vec<TaskMessage>>, ApiError> {
    tracing::info!("Getting messages for task {} (user {})", task_id, user.uid);

    state
        .store
        .get_task(&task_id)
        .await
        .map_err(|e| ApiError::server("Failed to fetch messages", e))?
        .ok_or_else(|| ApiError::not_found("Task"))?;

    let messages = state
        .store
        .list_task_messages(&task_id)
        .await
        .map_err(|e| ApiError::server("Failed to fetch messages", e))?;

    Ok(Json(messages))
}

/// POST /api/tasks/:task_id/messages
async fn send_task_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<TaskMessage>), ApiError> {
    state
        .store
        .get_task(&task_id)
        .await
        .map_err(|e| ApiError::server("Failed to send message", e))?
        .ok_or_else(|| ApiError::not_found("Task"))?;

    let form = read_send_form(&state, multipart).await?;

    if let Some(form_task) = &form.task_id {
        if form_task != &task_id {
            return Err(ApiError::Validation(format!(
                "taskId {} does not match the task in the path",
                form_task
            )));
        }
    }
    if form.message.trim().is_empty() && form.attachments.is_empty() {
        return Err(ApiError::Validation(
            "Message text or at least one attachment is required".to_string(),
        ));
    }

    let message = TaskMessage {
        id: task_message_id(&task_id, form.client_message_id.as_deref()),
        task_id: task_id.clone(),
        message: form.message,
        sender_id: user.uid.clone(),
        sender: SenderRef {
            id: user.uid.clone(),
            name: user.name.clone(),
        },
        created_at: Utc::now(),
        attachments: form.attachments,
        mentions: form.mentions,
        read_by: vec![user.uid.clone()],
        client_message_id: form.client_message_id,
    };

    // A retried send carrying the same client key returns the stored copy
    let inserted = state
        .store
        .create_task_message(&message)
        .await
        .map_err(|e| ApiError::server("Failed to send message", e))?;
    if let MessageInsert::Duplicate(existing) = inserted {
        tracing::info!("Duplicate send {} on task {} - returning stored message", existing.id, task_id);
        return Ok((StatusCode::OK, Json(existing)));
    }

    tracing::info!(
        "User {} posted message {} on task {} ({} mention(s), {} attachment(s))",
        user.uid,
        message.id,
        task_id,
        message.mentions.len(),
        message.attachments.len()
    );

    Ok((StatusCode::CREATED, Json(message)))
}

async fn read_send_form(state: &AppState, mut multipart: Multipart) -> Result<SendForm, ApiError> {
    let mut form = SendForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "attachments" | "attachments[]" => {
                let file_name = field.file_name().unwrap_or("attachment").to_string();
                let type_hint = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read attachment: {}", e)))?;

                let stored = state
                    .attachments
                    .store(&data, &file_name, type_hint.as_deref())
                    .await
                    .map_err(|e| match e {
                        AttachmentError::Io(io) => {
                            ApiError::server("Failed to store attachment", io)
                        }
                        other => ApiError::Validation(other.to_string()),
                    })?;
                form.attachments.push(stored);
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read field {}: {}", other, e)))?;
                match other {
                    "taskId" => form.task_id = Some(value).filter(|v| !v.is_empty()),
                    "message" => form.message = value,
                    "mentions" | "mentions[]" => {
                        if !value.trim().is_empty() && !form.mentions.contains(&value) {
                            form.mentions.push(value);
                        }
                    }
                    "clientMessageId" => form.client_message_id = Some(value).filter(|v| !v.is_empty()),
                    "attachmentUrls" | "attachmentUrls[]" => {
                        let name = value.rsplit('/').next().unwrap_or("attachment").to_string();
                        form.attachments.push(StoredAttachment {
                            mime_type: normalize_mime(None, &name),
                            uri: value,
                            name,
                        });
                    }
                    _ => tracing::debug!("Ignoring unknown multipart field {}", other),
                }
            }
        }
    }

    Ok(form)
}

pub fn task_messages_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/api/tasks/:task_id/messages",
            get(get_task_messages).post(send_task_message),
        )
        // Room for several attachments plus form overhead
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_mul(4)))
}
