//! Job lifecycle controller.
//!
//! Turns collaborator notifications into guarded transitions. Each handler
//! performs its external call first (transcript read, article enqueue) and
//! then commits the outcome as one conditional store update, so no lock is
//! ever held across I/O. Redelivered or late notifications find the job past
//! the expected predecessor and are ignored.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::job_store::{Commit, JobStore, StoreError};
use super::journal::TransitionJournal;
use crate::dispatch::{ArticleDispatcher, TranscriptDocument, TranscriptionDispatcher};
use crate::domain::{
    artifact::TRANSCRIPT_CONTENT_TYPE, ArticleNotification, ArticleOutcome, ArtifactKind,
    ArtifactRef, Job, JobEvent, JobMetadata, JobStatus, Owner, Transition,
    TranscriptionNotification, TranscriptionOutcome, DEFAULT_GENERATION_ERROR,
    DEFAULT_TRANSCRIPTION_ERROR,
};
use crate::error::PipelineError;
use crate::storage::ArtifactGateway;

/// What a notification did to its job
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// A transition was committed; the job as it now stands
    Applied(Job),

    /// The job was not in the expected state; nothing changed
    Ignored { job_id: Uuid, status: JobStatus },

    /// Transcript stored but the article enqueue failed; the job waits in
    /// `TRANSCRIBED` for the recovery sweep
    Stalled { job: Job, reason: String },
}

impl EventOutcome {
    /// Status of the job after handling
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Applied(job) | Self::Stalled { job, .. } => job.status,
            Self::Ignored { status, .. } => *status,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// The job state machine
pub struct JobLifecycleController {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactGateway>,
    transcription: Arc<TranscriptionDispatcher>,
    articles: ArticleDispatcher,
    journal: Option<Arc<TransitionJournal>>,
}

impl JobLifecycleController {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactGateway>,
        transcription: Arc<TranscriptionDispatcher>,
        articles: ArticleDispatcher,
    ) -> Self {
        Self {
            store,
            artifacts,
            transcription,
            articles,
            journal: None,
        }
    }

    /// Record committed transitions in a journal
    pub fn with_journal(mut self, journal: Arc<TransitionJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Create the record for a freshly dispatched job
    #[instrument(skip(self, owner, metadata), fields(user_id = %owner.user_id))]
    pub async fn on_submitted(
        &self,
        job_id: Uuid,
        owner: Owner,
        metadata: JobMetadata,
    ) -> Result<Job, PipelineError> {
        let job = Job::new(job_id, owner, metadata);

        match self.store.insert(&job).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(id)) => return Err(PipelineError::DuplicateJob(id)),
            Err(e) => return Err(e.into()),
        }

        info!(%job_id, file = %job.file_name, "Job created");
        self.record(JobEvent::new(
            job_id,
            None,
            JobStatus::Transcribing,
            format!("Job created for {}", job.file_name),
        ))
        .await;

        Ok(job)
    }

    /// Handle a completion report from the transcription engine
    #[instrument(skip(self, notification), fields(task = %notification.task_name))]
    pub async fn on_transcription_event(
        &self,
        notification: &TranscriptionNotification,
    ) -> Result<EventOutcome, PipelineError> {
        let task_name = notification.task_name.as_str();
        let job_id = self
            .transcription
            .resolve(task_name)
            .ok_or_else(|| PipelineError::JobNotFound(task_name.to_string()))?;

        let job = self.load(job_id).await?;
        if job.transcription_task != task_name {
            warn!(%job_id, stored = %job.transcription_task, "Task name does not match job");
            return Err(PipelineError::JobNotFound(task_name.to_string()));
        }

        if job.status != JobStatus::Transcribing {
            return Ok(self.ignored(job_id, job.status, "transcription"));
        }

        match &notification.outcome {
            TranscriptionOutcome::Failed { reason } => {
                let reason = reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_ERROR.to_string());
                warn!(%job_id, %reason, "Transcription failed");
                self.commit(job_id, Transition::transcription_failed(reason))
                    .await
            }
            TranscriptionOutcome::Completed { location } => {
                let key = location
                    .clone()
                    .unwrap_or_else(|| TranscriptionDispatcher::transcript_key(&job.user_id, job_id));

                let (text, artifact) = match self.read_transcript(&key).await {
                    Ok(read) => read,
                    Err(e) => {
                        warn!(%job_id, error = %e, "Transcript unreadable");
                        let reason = match e {
                            PipelineError::ArtifactRead { reason, .. } => {
                                format!("Failed to read transcript: {}", reason)
                            }
                            other => format!("Failed to read transcript: {}", other),
                        };
                        return self
                            .commit(job_id, Transition::transcription_failed(reason))
                            .await;
                    }
                };

                debug!(%job_id, chars = text.len(), "Transcript fetched");
                match self.commit(job_id, Transition::transcribed(text, artifact)).await? {
                    EventOutcome::Applied(job) => self.advance_to_generating(job).await,
                    other => Ok(other),
                }
            }
        }
    }

    /// Handle a completion report from the article worker
    #[instrument(skip(self, notification), fields(job_id = %notification.job_id))]
    pub async fn on_article_event(
        &self,
        notification: &ArticleNotification,
    ) -> Result<EventOutcome, PipelineError> {
        let job_id = notification.job_id;
        let job = self.load(job_id).await?;

        if job.status != JobStatus::Generating {
            return Ok(self.ignored(job_id, job.status, "article"));
        }

        let transition = match &notification.outcome {
            ArticleOutcome::Completed { result, article } => {
                Transition::completed(result.clone(), article.clone())
            }
            ArticleOutcome::Failed { reason } => {
                let reason = reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_GENERATION_ERROR.to_string());
                warn!(%job_id, %reason, "Article generation failed");
                Transition::failed(reason)
            }
        };

        self.commit(job_id, transition).await
    }

    /// Re-drive a job left in `TRANSCRIBED` by a failed enqueue
    #[instrument(skip(self))]
    pub async fn redrive(&self, job_id: Uuid) -> Result<EventOutcome, PipelineError> {
        let job = self.load(job_id).await?;
        if job.status != JobStatus::Transcribed {
            return Ok(self.ignored(job_id, job.status, "redrive"));
        }

        self.advance_to_generating(job).await
    }

    /// Enqueue the article request, then commit `GENERATING`
    async fn advance_to_generating(&self, job: Job) -> Result<EventOutcome, PipelineError> {
        let job_id = job.job_id;

        if let Err(e) = self.articles.enqueue_job(&job).await {
            error!(%job_id, error = %e, "Article enqueue failed; job left in TRANSCRIBED");
            return Ok(EventOutcome::Stalled {
                job,
                reason: e.to_string(),
            });
        }

        self.commit(job_id, Transition::generating()).await
    }

    async fn read_transcript(&self, key: &str) -> Result<(String, ArtifactRef), PipelineError> {
        let read_error = |reason: String| PipelineError::ArtifactRead {
            key: key.to_string(),
            reason,
        };

        let bytes = self
            .artifacts
            .get(key)
            .await
            .map_err(|e| read_error(e.to_string()))?;
        let document =
            TranscriptDocument::from_slice(&bytes).map_err(|e| read_error(format!("{:#}", e)))?;

        let artifact = ArtifactRef::describe(
            ArtifactKind::Transcript,
            key,
            TRANSCRIPT_CONTENT_TYPE,
            &bytes,
        );
        Ok((document.text, artifact))
    }

    async fn load(&self, job_id: Uuid) -> Result<Job, PipelineError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// Apply one conditional update and journal it
    async fn commit(
        &self,
        job_id: Uuid,
        transition: Transition,
    ) -> Result<EventOutcome, PipelineError> {
        match self.store.transition(job_id, &transition).await? {
            Commit::Applied(job) => {
                let from = transition.expected_from();
                info!(%job_id, from = ?from, to = %job.status, "Job transitioned");

                let mut event = JobEvent::new(job_id, from, job.status, summary(&job));
                if let Some(message) = &job.error_message {
                    event = event.with_error(message.clone());
                }
                self.record(event).await;

                Ok(EventOutcome::Applied(job))
            }
            Commit::Skipped { current } => {
                Ok(self.ignored(job_id, current, transition.to.as_str()))
            }
            Commit::NotFound => Err(PipelineError::JobNotFound(job_id.to_string())),
        }
    }

    fn ignored(&self, job_id: Uuid, status: JobStatus, event: &str) -> EventOutcome {
        info!(%job_id, %status, event, "Notification ignored; job not in expected state");
        EventOutcome::Ignored { job_id, status }
    }

    async fn record(&self, event: JobEvent) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&event).await {
                warn!(job_id = %event.job_id, error = %e, "Failed to write journal record");
            }
        }
    }
}

fn summary(job: &Job) -> String {
    match job.status {
        JobStatus::Transcribing => "Transcription started".to_string(),
        JobStatus::Transcribed => format!(
            "Transcript stored ({} chars)",
            job.transcript_text.as_deref().map(str::len).unwrap_or(0)
        ),
        JobStatus::Generating => "Article generation queued".to_string(),
        JobStatus::Completed => match &job.result {
            Some(result) => format!("Article ready: {}", result.titre),
            None => "Article ready".to_string(),
        },
        JobStatus::Failed => "Article generation failed".to_string(),
        JobStatus::TranscriptionFailed => "Transcription failed".to_string(),
    }
}
