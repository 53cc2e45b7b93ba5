// Field operations backend: material request workflow and task chat

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod task_chat;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use auth::{auth_extension, JwtAuth};
use config::Config;
use routes::{health_routes, material_requests_routes, task_messages_routes};
use services::{AttachmentStorage, FieldOpsStore, MaterialRequestService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FieldOpsStore>,
    pub material_requests: Arc<MaterialRequestService>,
    pub attachments: Arc<AttachmentStorage>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn FieldOpsStore>, attachments: AttachmentStorage, config: Config) -> Self {
        let material_requests = Arc::new(MaterialRequestService::new(
            store.clone(),
            config.enforce_status_transitions,
        ));
        Self {
            store,
            material_requests,
            attachments: Arc::new(attachments),
            config: Arc::new(config),
        }
    }
}

/// Full HTTP surface with auth, CORS, tracing and static uploads
pub fn build_router(state: AppState, auth: Arc<JwtAuth>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let uploads = ServeDir::new(state.attachments.base_path());
    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .merge(health_routes())
        .merge(material_requests_routes())
        .merge(task_messages_routes(max_upload_bytes))
        .with_state(state)
        .nest_service("/uploads", uploads)
        .layer(auth_extension(auth))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
