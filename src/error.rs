//! Error taxonomy for the job pipeline.

use thiserror::Error;
use uuid::Uuid;

use crate::core::job_store::StoreError;
use crate::core::validation::ValidationError;
use crate::storage::ArtifactError;

/// Errors surfaced by the submission path, the lifecycle controller and the
/// status queries
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected before any job or artifact was written
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Transcription engine or article queue could not be reached
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// No job matches the id (or task name)
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Transcript could not be fetched or decoded
    #[error("Failed to read transcript {key}: {reason}")]
    ArtifactRead { key: String, reason: String },

    #[error("Job already exists: {0}")]
    DuplicateJob(Uuid),

    #[error("Artifact storage error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Unknown jobs are dropped (not failed) when they come from a notification
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound(_))
    }
}
