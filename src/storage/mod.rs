use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::fs;
use uuid::Uuid;

use crate::store::FileMeta;
use crate::utils::sanitize_filename;
use crate::PipelineError;

/// Persists submitted media files and hands back a storage key
#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn store(&self, source: &Path) -> Result<FileMeta>;
}

/// Local-disk storage rooted at a configured directory, or a temporary
/// directory when none is configured.
pub struct LocalMediaStorage {
    root: PathBuf,
    // Keeps the fallback directory alive for the life of the storage.
    _temp: Option<TempDir>,
}

impl LocalMediaStorage {
    pub fn new(root: Option<PathBuf>) -> Result<Self> {
        match root {
            Some(root) => {
                fs_err::create_dir_all(&root)?;
                Ok(Self { root, _temp: None })
            }
            None => {
                let temp = TempDir::new()?;
                Ok(Self {
                    root: temp.path().to_path_buf(),
                    _temp: Some(temp),
                })
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn store(&self, source: &Path) -> Result<FileMeta> {
        let metadata = fs::metadata(source).await.map_err(|e| {
            PipelineError::Storage(format!("cannot access {}: {}", source.display(), e))
        })?;

        if !metadata.is_file() {
            return Err(
                PipelineError::Storage(format!("not a file: {}", source.display())).into(),
            );
        }
        if metadata.len() == 0 {
            return Err(
                PipelineError::Storage(format!("file is empty: {}", source.display())).into(),
            );
        }

        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let key = format!(
            "uploads/{}_{}",
            &Uuid::new_v4().to_string()[..8],
            sanitize_filename(&file_name)
        );
        let target = self.root.join(&key);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::Storage(format!("cannot create storage dir: {}", e))
            })?;
        }

        tracing::debug!(source = %source.display(), key, "storing media file");
        fs::copy(source, &target).await.map_err(|e| {
            PipelineError::Storage(format!("failed to store {}: {}", source.display(), e))
        })?;

        Ok(FileMeta {
            file_name,
            size_bytes: metadata.len(),
            mime_type: mime_for_path(source).to_string(),
            storage_key: key,
        })
    }
}

/// MIME type from file extension, defaulting to a generic binary type
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("aac") => "audio/mp4",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}
