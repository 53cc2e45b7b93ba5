// API error envelope
// Every handler failure is rendered as {"message": ..., "error": ...}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::RequestStatus;
use crate::services::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: RequestStatus, to: RequestStatus },

    #[error("Material request {id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict { id: String, expected: u64, actual: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unexpected persistence or I/O failure; `error` carries the raw text
    #[error("{message}: {error}")]
    Server { message: String, error: String },
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::NotFound(what.into())
    }

    pub fn server(message: impl Into<String>, error: impl ToString) -> Self {
        ApiError::Server {
            message: message.into(),
            error: error.to_string(),
        }
    }

    /// Wrap a store failure, keeping version conflicts distinguishable
    pub fn from_store(message: &str, err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { id, expected, actual } => {
                ApiError::Conflict { id, expected, actual }
            }
            other => ApiError::server(message, other),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidTransition { .. } | ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Server { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ApiError::Server { message, error } => json!({
                "message": message,
                "error": error,
            }),
            other => json!({
                "message": other.to_string(),
            }),
        };

        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        (status, Json(body)).into_response()
    }
}
