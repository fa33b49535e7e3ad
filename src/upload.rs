//! Upload storage.
//!
//! Files land at `<upload_dir>/<owner digest>/<unix_nanos>_<file name>`.
//! The owner folder is the hex SHA-256 of the identity, so every identity
//! maps to its own folder. The client-supplied file name is reduced to a
//! single safe path component, so it cannot climb out of that folder.

use axum::extract::multipart::Field;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid file name")]
    InvalidName,

    #[error("failed to read upload: {0}")]
    Read(String),

    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Reduces `raw` to one path component made of safe characters.
///
/// Returns `None` for names that are empty or only dots once cleaned.
pub fn sanitize_component(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        None
    } else {
        Some(cleaned)
    }
}

/// The folder holding `owner`'s uploads.
pub fn owner_dir(upload_dir: &Path, owner: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    upload_dir.join(format!("{:x}", hasher.finalize()))
}

/// Builds the destination path for a new upload.
pub fn upload_path(upload_dir: &Path, owner: &str, file_name: &str) -> Result<PathBuf, UploadError> {
    let file_name = sanitize_component(file_name).ok_or(UploadError::InvalidName)?;
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    Ok(owner_dir(upload_dir, owner).join(format!("{}_{}", nanos, file_name)))
}

/// Streams a multipart field to `dest`, creating parent directories.
///
/// Returns the number of bytes written. A partly written file is removed
/// when the stream fails.
pub async fn store_field(dest: &Path, field: Field<'_>) -> Result<u64, UploadError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let result = write_field(dest, field).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(dest).await {
            warn!(file = %dest.display(), error = %e, "failed to remove partial upload");
        }
    }
    result
}

async fn write_field(dest: &Path, mut field: Field<'_>) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::Read(e.body_text()))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
