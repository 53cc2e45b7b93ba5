// Field operations backend - HTTP server entry point

use std::fmt::Write as FmtWrite;
use std::fs::OpenOptions;
use std::io::LineWriter;
use std::sync::Arc;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use fieldops_backend::auth::JwtAuth;
use fieldops_backend::config::{Config, StoreBackend};
use fieldops_backend::services::{AttachmentStorage, FieldOpsStore, FirestoreStore, MemoryStore};
use fieldops_backend::{build_router, AppState};

/// Custom time formatter: [HH:mm:ss] [fieldops]
#[derive(Clone)]
struct BackendTimer;

impl FormatTime for BackendTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "[{}] [fieldops]", now.format("%H:%M:%S"))
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Stdout always; the log file only when it can be opened
    let (file_layer, _guard) = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(LineWriter::new(file));
            let layer = fmt::layer()
                .with_timer(BackendTimer)
                .with_target(false)
                .with_ansi(false)
                .with_writer(non_blocking)
                .boxed();
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", config.log_file, e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldops_backend=info,tower_http=info".into()),
        )
        .with(
            fmt::layer()
                .with_timer(BackendTimer)
                .with_target(false)
                .with_ansi(true),
        )
        .with(file_layer)
        .init();

    if let Err(e) = config.validate() {
        tracing::error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let store: Arc<dyn FieldOpsStore> = match config.store_backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Firestore => {
            let project_id = config.firebase_project_id.clone().unwrap_or_default();
            match FirestoreStore::new(project_id, config.google_application_credentials.as_deref()).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::error!("Failed to initialize Firestore: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let attachments = match AttachmentStorage::new(
        config.uploads_dir.clone(),
        &config.public_base_url,
        config.max_upload_bytes,
    )
    .await
    {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!("Failed to initialize attachment storage: {}", e);
            std::process::exit(1);
        }
    };

    let auth = Arc::new(JwtAuth::new(&config.jwt_secret));
    let addr = format!("0.0.0.0:{}", config.port);
    let app = build_router(AppState::new(store, attachments, config), auth);

    tracing::info!("Starting field operations backend on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
