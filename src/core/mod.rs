//! Core job lifecycle logic.
//!
//! This module contains:
//! - JobStore: durable job records with conditional transitions
//! - TransitionJournal: append-only audit log
//! - JobLifecycleController: the state machine
//! - SubmissionService / StatusQueryService: write and read entry points
//! - UploadPolicy: upload validation

pub mod job_store;
pub mod journal;
pub mod lifecycle;
pub mod status;
pub mod submission;
pub mod validation;

// Re-export commonly used types
pub use job_store::{Commit, JobStore, MemoryJobStore, SqliteJobStore, StoreError};
pub use journal::TransitionJournal;
pub use lifecycle::{EventOutcome, JobLifecycleController};
pub use status::{StatusQueryService, DEFAULT_LIST_LIMIT};
pub use submission::{SubmissionService, SubmitReceipt};
pub use validation::{UploadPolicy, ValidationError};
