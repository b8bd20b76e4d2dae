//! Durable job records keyed by job id.
//!
//! Creation is the only insert. Every later write goes through
//! [`JobStore::transition`], a conditional update that only applies when the
//! stored status equals the transition's predecessor. That check is the only
//! concurrency control the pipeline relies on: two deliveries of the same
//! notification race on it and exactly one wins.

mod memory;
mod sqlite;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Job, JobStatus, Transition, TransitionError};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Errors from the job store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job already exists: {0}")]
    Duplicate(Uuid),

    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Job store lock poisoned")]
    LockPoisoned,

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a conditional transition
#[derive(Debug, Clone)]
pub enum Commit {
    /// Transition applied; the updated record
    Applied(Job),

    /// Stored status was not the expected predecessor; nothing written
    Skipped { current: JobStatus },

    /// No record for the job id
    NotFound,
}

/// Storage for job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record; `StoreError::Duplicate` if the id exists
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    /// Fetch a record
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Apply `transition` if the stored status equals its predecessor
    async fn transition(&self, job_id: Uuid, transition: &Transition)
        -> Result<Commit, StoreError>;

    /// A user's jobs, most recent first, at most `limit`
    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// Non-terminal jobs whose last transition happened before `updated_before`
    async fn list_stale(&self, updated_before: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;
}

/// Decide what a transition does to a stored record.
///
/// Shared by the store implementations so both apply the exact same guard.
pub(crate) fn stage(stored: Option<Job>, transition: &Transition) -> Result<Staged, StoreError> {
    let Some(mut job) = stored else {
        return Ok(Staged::NotFound);
    };

    let expected = transition.expected_from().ok_or(TransitionError::NotAllowed {
        from: job.status,
        to: transition.to,
    })?;

    if job.status != expected {
        return Ok(Staged::Skipped {
            current: job.status,
        });
    }

    job.apply(transition)?;
    Ok(Staged::Write { expected, job })
}

pub(crate) enum Staged {
    Write { expected: JobStatus, job: Job },
    Skipped { current: JobStatus },
    NotFound,
}
