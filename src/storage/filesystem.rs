//! Filesystem-backed artifact gateway.
//!
//! Each key maps to a file under the storage root. A `.meta.json` sidecar
//! next to the blob records the content type it was written with.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::{validate_key, ArtifactError, ArtifactGateway};

/// Sidecar metadata written next to every blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub content_type: String,
    pub size_bytes: u64,
    pub stored_at: DateTime<Utc>,
}

/// Artifact gateway rooted at a local directory
pub struct FsArtifactGateway {
    root: PathBuf,
}

impl FsArtifactGateway {
    /// Create a gateway rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its file path
    pub fn path_for(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn metadata_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".meta.json");
        path.with_file_name(name)
    }

    /// Read the sidecar metadata of a stored blob
    pub async fn metadata(&self, key: &str) -> Result<BlobMetadata, ArtifactError> {
        let path = Self::metadata_path(&self.path_for(key)?);
        let content = fs::read(&path).await.map_err(|e| io_error(key, e))?;

        serde_json::from_slice(&content).map_err(|e| ArtifactError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

fn io_error(key: &str, source: std::io::Error) -> ArtifactError {
    if source.kind() == std::io::ErrorKind::NotFound {
        ArtifactError::NotFound(key.to_string())
    } else {
        ArtifactError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ArtifactGateway for FsArtifactGateway {
    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| io_error(key, e))
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ArtifactError> {
        let path = self.path_for(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        fs::write(&path, bytes).await.map_err(|e| io_error(key, e))?;

        let metadata = BlobMetadata {
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as u64,
            stored_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&metadata).map_err(|e| ArtifactError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        fs::write(Self::metadata_path(&path), json)
            .await
            .map_err(|e| io_error(key, e))?;

        debug!(key, content_type, size = bytes.len(), "Artifact stored");

        Ok(())
    }
}
