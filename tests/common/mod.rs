// Shared setup for HTTP tests: seeded in-memory store and a signed token

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use fieldops_backend::auth::JwtAuth;
use fieldops_backend::config::{Config, StoreBackend};
use fieldops_backend::models::{TaskRecord, UserRecord};
use fieldops_backend::services::{AttachmentStorage, FieldOpsStore, MemoryStore};
use fieldops_backend::{build_router, AppState};

pub const SECRET: &str = "integration-secret";

pub fn test_config(uploads_dir: &Path) -> Config {
    Config {
        port: 0,
        jwt_secret: SECRET.to_string(),
        store_backend: StoreBackend::Memory,
        firebase_project_id: None,
        google_application_credentials: None,
        uploads_dir: uploads_dir.to_path_buf(),
        public_base_url: "http://localhost:8080".to_string(),
        max_upload_bytes: 1024 * 1024,
        log_file: "/tmp/fieldops-test.log".to_string(),
        enforce_status_transitions: false,
    }
}

pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_task(TaskRecord {
            id: "task-1".to_string(),
            name: "Pour foundation".to_string(),
            project_id: Some("project-1".to_string()),
            created_by: Some("1".to_string()),
            assigned_user_ids: vec!["2".to_string()],
        })
        .await;
    store
        .insert_user(UserRecord {
            id: "7".to_string(),
            name: "Ana Souza".to_string(),
        })
        .await;
    store
}

pub async fn test_app(uploads_dir: &Path) -> (Router, Arc<MemoryStore>) {
    let store = seeded_store().await;
    let config = test_config(uploads_dir);
    let attachments = AttachmentStorage::new(
        config.uploads_dir.clone(),
        &config.public_base_url,
        config.max_upload_bytes,
    )
    .await
    .unwrap();
    let dyn_store: Arc<dyn FieldOpsStore> = store.clone();
    let auth = Arc::new(JwtAuth::new(SECRET));
    (build_router(AppState::new(dyn_store, attachments, config), auth), store)
}

pub fn token_for(uid: &str, name: &str) -> String {
    JwtAuth::new(SECRET).issue(uid, name, 3600).unwrap()
}
