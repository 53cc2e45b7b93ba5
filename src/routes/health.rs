// Health check

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
