//! Job record and lifecycle states.
//!
//! A job is created in `TRANSCRIBING` and only ever moves forward:
//!
//! ```text
//! TRANSCRIBING ──▶ TRANSCRIBED ──▶ GENERATING ──▶ COMPLETED
//!      │                               │
//!      ▼                               ▼
//! TRANSCRIPTION_FAILED               FAILED
//! ```
//!
//! Every target state has exactly one predecessor, which is what the
//! job store's conditional update checks against.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::artifact::{ArtifactKind, ArtifactRef};

/// Error message recorded when the engine reports a failure without a reason
pub const DEFAULT_TRANSCRIPTION_ERROR: &str = "Unknown transcription error";

/// Error message recorded when the worker reports a failure without a reason
pub const DEFAULT_GENERATION_ERROR: &str = "Unknown error during article generation";

/// Current time at the precision the job store keeps
fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Audio stored, transcription dispatched
    Transcribing,

    /// Transcript fetched into the job record
    Transcribed,

    /// Transcript handed to the article worker
    Generating,

    /// Article available
    Completed,

    /// Article generation failed
    Failed,

    /// Transcription failed or the transcript could not be read
    TranscriptionFailed,
}

impl JobStatus {
    /// Every status, in lifecycle order
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Transcribing,
        JobStatus::Transcribed,
        JobStatus::Generating,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::TranscriptionFailed,
    ];

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribing => "TRANSCRIBING",
            Self::Transcribed => "TRANSCRIBED",
            Self::Generating => "GENERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TranscriptionFailed => "TRANSCRIPTION_FAILED",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TranscriptionFailed
        )
    }

    /// Failure states carry an error message
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TranscriptionFailed)
    }

    /// The only state a job may be in right before entering this one.
    ///
    /// `TRANSCRIBING` has none: it is only entered by creating the record.
    pub fn predecessor(&self) -> Option<JobStatus> {
        match self {
            Self::Transcribing => None,
            Self::Transcribed | Self::TranscriptionFailed => Some(Self::Transcribing),
            Self::Generating => Some(Self::Transcribed),
            Self::Completed | Self::Failed => Some(Self::Generating),
        }
    }

    /// Check an edge of the transition graph
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessor() == Some(*self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status string
#[derive(Debug, Clone, Error)]
#[error("Unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Structured article produced by the generation worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleResult {
    pub titre: String,
    pub introduction: String,
    pub article: String,
    pub conclusion: String,
}

/// Identity of the submitting user, as supplied by the auth boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: String,
    pub user_email: String,
}

/// Metadata captured at submission time
#[derive(Debug, Clone)]
pub struct JobMetadata {
    /// Original file name
    pub file_name: String,

    /// Size of the upload in bytes
    pub file_size: u64,

    /// Name of the transcription task started for this job
    pub transcription_task: String,

    /// The stored audio
    pub audio: ArtifactRef,
}

/// A job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub user_id: String,
    pub user_email: String,
    pub status: JobStatus,
    pub file_name: String,
    pub file_size: u64,
    pub transcription_task: String,

    /// Append-only list of stored blobs
    #[serde(default)]
    pub artifact_refs: Vec<ArtifactRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ArticleResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in `TRANSCRIBING`
    pub fn new(job_id: Uuid, owner: Owner, metadata: JobMetadata) -> Self {
        let now = now_micros();
        Self {
            job_id,
            user_id: owner.user_id,
            user_email: owner.user_email,
            status: JobStatus::Transcribing,
            file_name: metadata.file_name,
            file_size: metadata.file_size,
            transcription_task: metadata.transcription_task,
            artifact_refs: vec![metadata.audio],
            transcript_text: None,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            transcribed_at: None,
            completed_at: None,
        }
    }

    /// First artifact of the given kind
    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        self.artifact_refs.iter().find(|a| a.kind == kind)
    }

    /// Apply a transition in place.
    ///
    /// Nothing is mutated unless the edge exists and the transition carries
    /// the payload its target state requires.
    pub fn apply(&mut self, transition: &Transition) -> Result<(), TransitionError> {
        let to = transition.to;
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::NotAllowed {
                from: self.status,
                to,
            });
        }

        match to {
            JobStatus::Transcribed if transition.transcript_text.is_none() => {
                return Err(TransitionError::MissingPayload {
                    to,
                    field: "transcript_text",
                });
            }
            JobStatus::Completed if transition.result.is_none() => {
                return Err(TransitionError::MissingPayload { to, field: "result" });
            }
            JobStatus::Failed | JobStatus::TranscriptionFailed
                if transition.error_message.is_none() =>
            {
                return Err(TransitionError::MissingPayload {
                    to,
                    field: "error_message",
                });
            }
            _ => {}
        }

        match to {
            JobStatus::Transcribed => {
                self.transcript_text = transition.transcript_text.clone();
                self.transcribed_at = Some(transition.at);
            }
            JobStatus::Completed => {
                self.result = transition.result.clone();
                self.completed_at = Some(transition.at);
            }
            JobStatus::Failed | JobStatus::TranscriptionFailed => {
                self.error_message = transition.error_message.clone();
            }
            JobStatus::Transcribing | JobStatus::Generating => {}
        }

        self.artifact_refs.extend(transition.artifacts.iter().cloned());
        self.status = to;
        self.updated_at = transition.at;

        Ok(())
    }

    /// Check the record-level invariants tying payload fields to status
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.result.is_some() != (self.status == JobStatus::Completed) {
            return Err(format!(
                "result present={} with status {}",
                self.result.is_some(),
                self.status
            ));
        }

        if self.error_message.is_some() != self.status.is_failure() {
            return Err(format!(
                "error_message present={} with status {}",
                self.error_message.is_some(),
                self.status
            ));
        }

        let on_success_path = matches!(
            self.status,
            JobStatus::Transcribed | JobStatus::Generating | JobStatus::Completed
        );
        if on_success_path && self.transcript_text.is_none() {
            return Err(format!("transcript_text missing with status {}", self.status));
        }

        if self.artifact(ArtifactKind::Audio).is_none() {
            return Err("audio artifact missing".to_string());
        }

        Ok(())
    }
}

/// A requested move to a new state, with the payload that state needs
#[derive(Debug, Clone)]
pub struct Transition {
    pub to: JobStatus,
    pub transcript_text: Option<String>,
    pub result: Option<ArticleResult>,
    pub error_message: Option<String>,
    pub artifacts: Vec<ArtifactRef>,
    pub at: DateTime<Utc>,
}

impl Transition {
    fn entering(status: JobStatus) -> Self {
        Self {
            to: status,
            transcript_text: None,
            result: None,
            error_message: None,
            artifacts: Vec::new(),
            at: now_micros(),
        }
    }

    /// `TRANSCRIBING → TRANSCRIBED`
    pub fn transcribed(transcript_text: String, transcript: ArtifactRef) -> Self {
        Self {
            transcript_text: Some(transcript_text),
            artifacts: vec![transcript],
            ..Self::entering(JobStatus::Transcribed)
        }
    }

    /// `TRANSCRIBING → TRANSCRIPTION_FAILED`
    pub fn transcription_failed(reason: impl Into<String>) -> Self {
        Self {
            error_message: Some(reason.into()),
            ..Self::entering(JobStatus::TranscriptionFailed)
        }
    }

    /// `TRANSCRIBED → GENERATING`
    pub fn generating() -> Self {
        Self::entering(JobStatus::Generating)
    }

    /// `GENERATING → COMPLETED`
    pub fn completed(result: ArticleResult, article: Option<ArtifactRef>) -> Self {
        Self {
            result: Some(result),
            artifacts: article.into_iter().collect(),
            ..Self::entering(JobStatus::Completed)
        }
    }

    /// `GENERATING → FAILED`
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error_message: Some(reason.into()),
            ..Self::entering(JobStatus::Failed)
        }
    }

    /// The stored status this transition must find
    pub fn expected_from(&self) -> Option<JobStatus> {
        self.to.predecessor()
    }
}

/// Transition rejected by the state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid state transition: {from} → {to}")]
    NotAllowed { from: JobStatus, to: JobStatus },

    #[error("Transition to {to} requires {field}")]
    MissingPayload { to: JobStatus, field: &'static str },
}
