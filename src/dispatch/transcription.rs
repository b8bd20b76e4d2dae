//! Transcription dispatcher.
//!
//! Task names are `{prefix}{job_id}`, so a completion notification maps back
//! to its job without a lookup table.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{artifact_key, ArtifactKind, ArtifactRef};
use crate::error::PipelineError;

/// File name of the transcript written by the engine
pub const TRANSCRIPT_FILE_NAME: &str = "transcript.json";

/// Transcript document stored by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptDocument {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl TranscriptDocument {
    /// Decode a stored transcript.
    ///
    /// Accepts the local `{text, ...}` layout and the hosted-engine layout
    /// `{results: {transcripts: [{transcript}]}}`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let stored: StoredTranscript =
            serde_json::from_slice(bytes).context("Transcript is not valid JSON")?;

        match stored {
            StoredTranscript::Plain(doc) => Ok(doc),
            StoredTranscript::Engine { results } => {
                let first = results
                    .transcripts
                    .into_iter()
                    .next()
                    .context("Transcript document contains no transcripts")?;
                Ok(Self {
                    text: first.transcript,
                    language: None,
                    duration_seconds: None,
                })
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredTranscript {
    Plain(TranscriptDocument),
    Engine { results: EngineResults },
}

#[derive(Deserialize)]
struct EngineResults {
    transcripts: Vec<EngineTranscript>,
}

#[derive(Deserialize)]
struct EngineTranscript {
    transcript: String,
}

/// A request handed to the speech-to-text engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    /// Caller-chosen task name, echoed back in the notification
    pub task_name: String,

    /// Storage key of the audio
    pub source_key: String,

    /// Storage key the transcript should be written to
    pub output_key: String,

    /// Language hint (BCP 47, e.g. `fr-FR`)
    pub language: String,
}

/// An asynchronous speech-to-text engine
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Human-readable engine name
    fn name(&self) -> &str;

    /// Start a task and return without waiting for the transcript
    async fn start(&self, request: TranscriptionRequest) -> Result<()>;
}

/// Starts transcription tasks and maps task names back to jobs
pub struct TranscriptionDispatcher {
    engine: Arc<dyn TranscriptionEngine>,
    task_prefix: String,
}

impl TranscriptionDispatcher {
    pub fn new(engine: Arc<dyn TranscriptionEngine>, task_prefix: impl Into<String>) -> Self {
        Self {
            engine,
            task_prefix: task_prefix.into(),
        }
    }

    /// Name of the engine behind this dispatcher
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Deterministic task name for a job
    pub fn task_name(&self, job_id: Uuid) -> String {
        format!("{}{}", self.task_prefix, job_id)
    }

    /// Map a task name back to its job id.
    ///
    /// Only a leading prefix is stripped and the remainder must be a UUID;
    /// anything else is not one of ours.
    pub fn resolve(&self, task_name: &str) -> Option<Uuid> {
        task_name
            .strip_prefix(&self.task_prefix)
            .and_then(|rest| Uuid::parse_str(rest).ok())
    }

    /// Default storage key of a job's transcript
    pub fn transcript_key(user_id: &str, job_id: Uuid) -> String {
        artifact_key(user_id, ArtifactKind::Transcript, job_id, TRANSCRIPT_FILE_NAME)
    }

    /// Start transcription of `audio` and return the task name
    pub async fn start(
        &self,
        job_id: Uuid,
        user_id: &str,
        audio: &ArtifactRef,
        language: &str,
    ) -> Result<String, PipelineError> {
        let task_name = self.task_name(job_id);
        let request = TranscriptionRequest {
            task_name: task_name.clone(),
            source_key: audio.key.clone(),
            output_key: Self::transcript_key(user_id, job_id),
            language: language.to_string(),
        };

        debug!(engine = self.engine.name(), task = %task_name, "Starting transcription");

        self.engine
            .start(request)
            .await
            .map_err(|e| PipelineError::Dispatch(format!("{:#}", e)))?;

        info!(%job_id, task = %task_name, "Transcription dispatched");
        Ok(task_name)
    }
}
