//! Notifications from the asynchronous collaborators, and the journal
//! records written for every committed transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactRef;
use super::job::{ArticleResult, JobStatus};

/// Completion report from the speech-to-text engine (one per task)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionNotification {
    /// Task name chosen at dispatch time
    pub task_name: String,

    #[serde(flatten)]
    pub outcome: TranscriptionOutcome,
}

/// Outcome of a transcription task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TranscriptionOutcome {
    /// Transcript written; `location` is its storage key when the engine
    /// reports one
    Completed { location: Option<String> },

    /// Engine gave up
    Failed { reason: Option<String> },
}

/// Completion report from the article worker (one per queued message)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleNotification {
    pub job_id: Uuid,

    #[serde(flatten)]
    pub outcome: ArticleOutcome,
}

/// Outcome of article generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArticleOutcome {
    /// Article generated; `article` points at the stored copy if the worker
    /// managed to write one
    Completed {
        result: ArticleResult,
        article: Option<ArtifactRef>,
    },

    /// Generation failed
    Failed { reason: Option<String> },
}

/// Any notification the pipeline consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Notification {
    Transcription(TranscriptionNotification),
    Article(ArticleNotification),
}

/// One committed transition, as written to the journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique identifier for this record
    pub id: Uuid,

    /// When the transition was committed
    pub timestamp: DateTime<Utc>,

    pub job_id: Uuid,

    /// State before the transition (`None` for job creation)
    pub from: Option<JobStatus>,

    pub to: JobStatus,

    /// Human-readable summary (no transcript or article content)
    pub summary: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    /// Create a journal record stamped now
    pub fn new(job_id: Uuid, from: Option<JobStatus>, to: JobStatus, summary: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            job_id,
            from,
            to,
            summary,
            error: None,
        }
    }

    /// Attach an error message
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}
