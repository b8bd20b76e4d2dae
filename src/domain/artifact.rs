//! Artifacts stored alongside a job.
//!
//! Every blob a job produces (the uploaded audio, the transcript, the
//! generated article) lives in the artifact gateway under
//! `{user_id}/{kind}/{job_id}/{name}`. The job record only keeps references.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Content type recorded for transcripts
pub const TRANSCRIPT_CONTENT_TYPE: &str = "application/json";

/// Content type recorded for generated articles
pub const ARTICLE_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A reference to a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// What the blob holds
    pub kind: ArtifactKind,

    /// Storage key (relative to the gateway root)
    pub key: String,

    /// MIME type used when the blob was written
    pub content_type: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// SHA256 of the content (hex)
    pub sha256: String,
}

impl ArtifactRef {
    /// Describe a blob from its content
    pub fn describe(
        kind: ArtifactKind,
        key: impl Into<String>,
        content_type: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            content_type: content_type.into(),
            size_bytes: bytes.len() as u64,
            sha256: content_hash(bytes),
        }
    }
}

/// Kinds of artifacts a job accumulates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The uploaded audio file
    Audio,

    /// Transcript produced by the speech-to-text engine
    Transcript,

    /// Structured article produced by the generation worker
    Article,
}

impl ArtifactKind {
    /// Path segment used in storage keys
    pub fn segment(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Transcript => "transcriptions",
            Self::Article => "articles",
        }
    }
}

/// Build the storage key for a job artifact: `{user_id}/{kind}/{job_id}/{name}`
pub fn artifact_key(user_id: &str, kind: ArtifactKind, job_id: Uuid, name: &str) -> String {
    format!("{}/{}/{}/{}", user_id, kind.segment(), job_id, name)
}

/// Guess the audio content type from a file name
pub fn audio_content_type(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".mp3") {
        "audio/mpeg"
    } else if lower.ends_with(".m4a") {
        "audio/mp4"
    } else if lower.ends_with(".wav") {
        "audio/wav"
    } else {
        "application/octet-stream"
    }
}

/// SHA256 of content as lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
