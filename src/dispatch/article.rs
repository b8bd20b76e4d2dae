//! Article dispatcher: hands transcripts to the generation worker.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::{ArtifactKind, Job};
use crate::error::PipelineError;

/// A generation request as it travels through the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRequest {
    pub job_id: Uuid,
    pub user_id: String,
    pub file_name: String,
    pub transcript_text: String,

    /// Storage key of the source audio
    pub audio_key: String,
}

/// Transport to the article worker.
///
/// Success means "accepted for processing"; delivery is at-least-once.
#[async_trait]
pub trait ArticleQueue: Send + Sync {
    /// Queue a request and return its message id
    async fn enqueue(&self, request: &ArticleRequest) -> Result<String>;
}

/// Builds requests from job records and enqueues them
pub struct ArticleDispatcher {
    queue: Arc<dyn ArticleQueue>,
}

impl ArticleDispatcher {
    pub fn new(queue: Arc<dyn ArticleQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue generation for a transcribed job
    pub async fn enqueue(
        &self,
        job_id: Uuid,
        user_id: &str,
        transcript_text: &str,
        audio_key: &str,
        file_name: &str,
    ) -> Result<String, PipelineError> {
        let request = ArticleRequest {
            job_id,
            user_id: user_id.to_string(),
            file_name: file_name.to_string(),
            transcript_text: transcript_text.to_string(),
            audio_key: audio_key.to_string(),
        };

        let message_id = self
            .queue
            .enqueue(&request)
            .await
            .map_err(|e| PipelineError::Dispatch(format!("{:#}", e)))?;

        info!(%job_id, message_id = %message_id, "Article generation queued");
        Ok(message_id)
    }

    /// Enqueue generation from a job record in `TRANSCRIBED`
    pub async fn enqueue_job(&self, job: &Job) -> Result<String, PipelineError> {
        let transcript = job.transcript_text.as_deref().ok_or_else(|| {
            PipelineError::Dispatch(format!("job {} has no transcript to send", job.job_id))
        })?;
        let audio_key = job
            .artifact(ArtifactKind::Audio)
            .map(|a| a.key.as_str())
            .unwrap_or_default();

        self.enqueue(job.job_id, &job.user_id, transcript, audio_key, &job.file_name)
            .await
    }
}
