//! podscribe - audio-to-article job pipeline
//!
//! Turns an uploaded audio recording into a structured written article
//! through two asynchronous stages: speech-to-text transcription, then
//! AI article generation.
//!
//! # Architecture
//!
//! Every job is a record in a durable store driven by a small state machine:
//! - Submission validates the upload, stores it and starts transcription
//! - Collaborators report outcomes as at-least-once notifications
//! - Each notification commits one conditional transition, so redelivered
//!   or late reports are ignored instead of corrupting the record
//!
//! # Modules
//!
//! - `core`: Job store, lifecycle controller, submission and status services
//! - `domain`: Data structures (Job, JobStatus, ArtifactRef, notifications)
//! - `dispatch`: Transcription and article dispatchers, article queue
//! - `adapters`: External systems (Anthropic, Fabric, Whisper)
//! - `worker`: Article generation worker
//! - `storage`: Artifact gateway (filesystem, in-memory)
//! - `runtime`: Process wiring and the notification pump
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a recording and wait for the article
//! podscribe submit emission.mp3 --user-id u1 --user-email u1@example.com --follow
//!
//! # Check a job
//! podscribe status <job-id>
//!
//! # Drain the article queue
//! podscribe work --once
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod runtime;
pub mod storage;
pub mod worker;

// Re-export main types at crate root for convenience
pub use crate::core::{JobLifecycleController, StatusQueryService, SubmissionService};
pub use domain::{Job, JobStatus, Notification};
pub use error::PipelineError;
pub use runtime::Runtime;
