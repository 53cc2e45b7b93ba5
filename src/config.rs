// Configuration - Environment variables

use std::env;
use std::path::PathBuf;

/// Which persistence backend to run against
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    Firestore,
}

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// HS256 secret shared with the identity service
    pub jwt_secret: String,
    pub store_backend: StoreBackend,
    /// Firebase/GCP project ID (firestore backend)
    pub firebase_project_id: Option<String>,
    /// Service account JSON path (firestore backend)
    pub google_application_credentials: Option<String>,
    /// Directory attachments are written to
    pub uploads_dir: PathBuf,
    /// Base URL used to build attachment links
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub log_file: String,
    /// Reject material request status changes outside the approval flow
    pub enforce_status_transitions: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        Self {
            port,
            jwt_secret: env::var("JWT_SECRET").unwrap_or_default(),
            store_backend: match env::var("STORE_BACKEND").ok().as_deref() {
                Some("firestore") => StoreBackend::Firestore,
                _ => StoreBackend::Memory,
            },
            firebase_project_id: env::var("FIREBASE_PROJECT_ID")
                .ok()
                .or_else(|| env::var("GCP_PROJECT_ID").ok()),
            google_application_credentials: env::var("GOOGLE_APPLICATION_CREDENTIALS").ok(),
            uploads_dir: env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25 * 1024 * 1024),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "/tmp/fieldops.log".to_string()),
            enforce_status_transitions: env::var("ENFORCE_STATUS_TRANSITIONS")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Validate that required configuration is present
    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.trim().is_empty() {
            return Err("JWT_SECRET must be set".to_string());
        }
        if self.store_backend == StoreBackend::Firestore && self.firebase_project_id.is_none() {
            return Err("STORE_BACKEND=firestore requires FIREBASE_PROJECT_ID".to_string());
        }
        if self.store_backend == StoreBackend::Memory {
            tracing::warn!("Using in-memory store - data is lost on restart");
        }
        if self.store_backend == StoreBackend::Firestore && self.google_application_credentials.is_none() {
            tracing::warn!("GOOGLE_APPLICATION_CREDENTIALS not set - Firestore will use the metadata server");
        }
        Ok(())
    }
}

#[cfg(test)]
impl Config {
    /// In-memory configuration for tests
    pub fn for_tests(uploads_dir: PathBuf) -> Self {
        Self {
            port: 0,
            jwt_secret: "test-secret".to_string(),
            store_backend: StoreBackend::Memory,
            firebase_project_id: None,
            google_application_credentials: None,
            uploads_dir,
            public_base_url: "http://localhost:8080".to_string(),
            max_upload_bytes: 1024 * 1024,
            log_file: "/tmp/fieldops-test.log".to_string(),
            enforce_status_transitions: false,
        }
    }
}
