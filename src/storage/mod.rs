//! Artifact gateway: named byte blobs under a per-user, per-job namespace.
//!
//! Keys look like `{user_id}/{kind}/{job_id}/{name}`. The gateway does not
//! interpret them beyond rejecting keys that could escape its root.

pub mod filesystem;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use filesystem::FsArtifactGateway;
pub use memory::MemoryArtifactGateway;

/// Errors from artifact storage
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read/write access to stored blobs
#[async_trait]
pub trait ArtifactGateway: Send + Sync {
    /// Fetch the bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Store `bytes` under `key`, replacing any previous content
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ArtifactError>;
}

/// Reject empty, absolute or traversing keys
pub fn validate_key(key: &str) -> Result<(), ArtifactError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }

    Ok(())
}
