//! In-memory artifact gateway for tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{validate_key, ArtifactError, ArtifactGateway};

/// Artifact gateway keeping blobs in a map
#[derive(Default)]
pub struct MemoryArtifactGateway {
    blobs: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryArtifactGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = blobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Content type a key was stored with
    pub fn content_type(&self, key: &str) -> Option<String> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.get(key).map(|(content_type, _)| content_type.clone())
    }
}

#[async_trait]
impl ArtifactGateway for MemoryArtifactGateway {
    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        validate_key(key)?;
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs
            .get(key)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ArtifactError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ArtifactError> {
        validate_key(key)?;
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.insert(key.to_string(), (content_type.to_string(), bytes.to_vec()));
        Ok(())
    }
}
