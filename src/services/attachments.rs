// Attachment storage - local directory served under /uploads
// Files are content-addressed so re-uploads of the same blob share one file

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::models::StoredAttachment;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Attachment is empty")]
    Empty,

    #[error("Attachment too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Attachment storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-derived file id: first 10 bytes of the SHA-256 digest, hex encoded
pub fn content_id(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    hex::encode(&digest[..10])
}

/// Map a client type hint to a concrete MIME type.
/// Bare "image"/"video" hints become image/jpeg and video/mp4; full types pass
/// through; anything else is guessed from the file extension or left as
/// application/octet-stream.
pub fn normalize_mime(type_hint: Option<&str>, file_name: &str) -> String {
    match type_hint.map(str::trim).filter(|t| !t.is_empty()) {
        Some("image") => return "image/jpeg".to_string(),
        Some("video") => return "video/mp4".to_string(),
        Some(t) if t.contains('/') => return t.to_string(),
        _ => {}
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[derive(Debug, Clone)]
pub struct AttachmentStorage {
    base_path: PathBuf,
    public_base_url: String,
    max_size: usize,
}

impl AttachmentStorage {
    pub async fn new(
        base_path: PathBuf,
        public_base_url: &str,
        max_size: usize,
    ) -> Result<Self, AttachmentError> {
        fs::create_dir_all(&base_path).await?;
        tracing::info!("Attachment storage at {}", base_path.display());

        Ok(Self {
            base_path,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Persist a blob and return the reference stored on the message
    pub async fn store(
        &self,
        data: &[u8],
        original_name: &str,
        type_hint: Option<&str>,
    ) -> Result<StoredAttachment, AttachmentError> {
        if data.is_empty() {
            return Err(AttachmentError::Empty);
        }
        if data.len() > self.max_size {
            return Err(AttachmentError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let mime_type = normalize_mime(type_hint, original_name);
        let file_name = match sanitized_extension(original_name) {
            Some(ext) => format!("{}.{}", content_id(data), ext),
            None => content_id(data),
        };
        let path = self.base_path.join(&file_name);

        if fs::try_exists(&path).await? {
            tracing::debug!("Attachment {} already stored", file_name);
        } else {
            fs::write(&path, data).await?;
            tracing::info!("Stored attachment {} ({} bytes)", file_name, data.len());
        }

        Ok(StoredAttachment {
            uri: format!(
                "{}/uploads/{}",
                self.public_base_url,
                urlencoding::encode(&file_name)
            ),
            name: original_name.to_string(),
            mime_type,
        })
    }
}

/// Lowercased alphanumeric extension, if the name has a usable one
fn sanitized_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mime() {
        assert_eq!(normalize_mime(Some("image"), "IMG_1.HEIC"), "image/jpeg");
        assert_eq!(normalize_mime(Some("video"), "clip"), "video/mp4");
        assert_eq!(normalize_mime(Some("application/pdf"), "x"), "application/pdf");
        assert_eq!(normalize_mime(None, "plan.PDF"), "application/pdf");
        assert_eq!(normalize_mime(Some("document"), "notes"), "application/octet-stream");
    }

    #[test]
    fn test_content_id_is_stable() {
        let id = content_id(b"site photo");
        assert_eq!(id.len(), 20);
        assert_eq!(id, content_id(b"site photo"));
        assert_ne!(id, content_id(b"another photo"));
    }

    #[tokio::test]
    async fn test_store_writes_file_and_builds_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path().to_path_buf(), "http://host:8080/", 1024)
            .await
            .unwrap();

        let stored = storage.store(b"jpegbytes", "../crack.jpg", Some("image")).await.unwrap();
        assert_eq!(stored.mime_type, "image/jpeg");
        assert_eq!(stored.name, "../crack.jpg");
        assert!(stored.uri.starts_with("http://host:8080/uploads/"));
        assert!(stored.uri.ends_with(".jpg"));

        let file_name = stored.uri.rsplit('/').next().unwrap();
        assert!(dir.path().join(file_name).exists());
    }

    #[tokio::test]
    async fn test_store_rejects_empty_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path().to_path_buf(), "http://h", 4)
            .await
            .unwrap();

        assert!(matches!(
            storage.store(b"", "a.png", None).await,
            Err(AttachmentError::Empty)
        ));
        assert!(matches!(
            storage.store(b"12345", "a.png", None).await,
            Err(AttachmentError::TooLarge { size: 5, max: 4 })
        ));
    }
}
