//! Submission path: validate, store the audio, dispatch, create the job.
//!
//! The record is only inserted once the engine accepted the task, so a
//! dispatch failure never leaves a stuck job behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::lifecycle::JobLifecycleController;
use super::validation::UploadPolicy;
use crate::dispatch::TranscriptionDispatcher;
use crate::domain::{
    artifact_key, audio_content_type, ArtifactKind, ArtifactRef, JobMetadata, JobStatus, Owner,
};
use crate::error::PipelineError;
use crate::storage::ArtifactGateway;

/// What the submitter gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub file_name: String,
    pub file_size: u64,
}

/// Accepts uploads and starts their jobs
pub struct SubmissionService {
    policy: UploadPolicy,
    language: String,
    artifacts: Arc<dyn ArtifactGateway>,
    transcription: Arc<TranscriptionDispatcher>,
    controller: Arc<JobLifecycleController>,
}

impl SubmissionService {
    pub fn new(
        policy: UploadPolicy,
        language: impl Into<String>,
        artifacts: Arc<dyn ArtifactGateway>,
        transcription: Arc<TranscriptionDispatcher>,
        controller: Arc<JobLifecycleController>,
    ) -> Self {
        Self {
            policy,
            language: language.into(),
            artifacts,
            transcription,
            controller,
        }
    }

    /// Submit an audio file on behalf of `owner`
    #[instrument(skip(self, bytes, owner), fields(user_id = %owner.user_id, size = bytes.len()))]
    pub async fn submit(
        &self,
        bytes: &[u8],
        file_name: &str,
        owner: Owner,
    ) -> Result<SubmitReceipt, PipelineError> {
        let file_size = bytes.len() as u64;
        self.policy.validate(file_name, file_size, &owner.user_id)?;

        let job_id = Uuid::new_v4();
        let key = artifact_key(&owner.user_id, ArtifactKind::Audio, job_id, file_name);
        let content_type = audio_content_type(file_name);

        self.artifacts.put(&key, bytes, content_type).await?;
        let audio = ArtifactRef::describe(ArtifactKind::Audio, key, content_type, bytes);

        let task_name = self
            .transcription
            .start(job_id, &owner.user_id, &audio, &self.language)
            .await?;

        let job = self
            .controller
            .on_submitted(
                job_id,
                owner,
                JobMetadata {
                    file_name: file_name.to_string(),
                    file_size,
                    transcription_task: task_name,
                    audio,
                },
            )
            .await?;

        info!(%job_id, file = %file_name, "Upload accepted");

        Ok(SubmitReceipt {
            job_id,
            status: job.status,
            file_name: job.file_name,
            file_size,
        })
    }
}
