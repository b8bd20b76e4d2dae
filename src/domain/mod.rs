//! Domain types for the audio-to-article pipeline.
//!
//! This module contains the core data structures:
//! - Job: the lifecycle record and its state machine
//! - Artifact: references to stored blobs
//! - Events: notifications from collaborators and journal records

pub mod artifact;
pub mod events;
pub mod job;

// Re-export commonly used types
pub use artifact::{artifact_key, audio_content_type, ArtifactKind, ArtifactRef};
pub use events::{
    ArticleNotification, ArticleOutcome, JobEvent, Notification, TranscriptionNotification,
    TranscriptionOutcome,
};
pub use job::{
    ArticleResult, Job, JobMetadata, JobStatus, Owner, Transition, TransitionError,
    DEFAULT_GENERATION_ERROR, DEFAULT_TRANSCRIPTION_ERROR,
};
