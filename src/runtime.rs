//! Process wiring.
//!
//! Builds the store, artifact gateway, dispatchers, controller and worker
//! from a [`ResolvedConfig`], and pumps collaborator notifications into the
//! controller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{Adapter, AnthropicAdapter, FabricAdapter, WhisperEngine, WhisperSettings};
use crate::config::{AdapterKind, ArticleConfig, ResolvedConfig};
use crate::core::{
    EventOutcome, JobLifecycleController, SqliteJobStore, StatusQueryService,
    SubmissionService, TransitionJournal,
};
use crate::dispatch::{ArticleDispatcher, JsonlArticleQueue, TranscriptionDispatcher};
use crate::domain::{ArticleNotification, Job, JobStatus, Notification};
use crate::error::PipelineError;
use crate::storage::FsArtifactGateway;
use crate::worker::{ArticleWorker, OutcomeSink, WorkerSettings};

/// Reports worker outcomes straight to the controller
pub struct ControllerSink {
    controller: Arc<JobLifecycleController>,
}

impl ControllerSink {
    pub fn new(controller: Arc<JobLifecycleController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl OutcomeSink for ControllerSink {
    async fn deliver(&self, notification: ArticleNotification) -> Result<()> {
        let job_id = notification.job_id;
        match self.controller.on_article_event(&notification).await {
            // Enqueued but GENERATING not committed yet; keep the message for the next drain
            Ok(EventOutcome::Ignored {
                status: JobStatus::Transcribed,
                ..
            }) => anyhow::bail!("Job {} has not started generating yet", job_id),
            Ok(outcome) => {
                debug!(%job_id, status = %outcome.status(), "Article outcome applied");
                Ok(())
            }
            // Nothing to retry for a job that does not exist
            Err(e) if e.is_not_found() => {
                warn!(%job_id, "Article outcome for unknown job dropped");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to apply article outcome for {}", job_id)),
        }
    }
}

/// Route one notification to its handler.
///
/// Notifications for unknown jobs are logged and dropped (`Ok(None)`).
pub async fn handle_notification(
    controller: &JobLifecycleController,
    notification: &Notification,
) -> Result<Option<EventOutcome>, PipelineError> {
    let handled = match notification {
        Notification::Transcription(n) => controller.on_transcription_event(n).await,
        Notification::Article(n) => controller.on_article_event(n).await,
    };

    match handled {
        Ok(outcome) => Ok(Some(outcome)),
        Err(e) if e.is_not_found() => {
            warn!(error = %e, "Notification for unknown job dropped");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Result of a recovery sweep
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Jobs moved from `TRANSCRIBED` to `GENERATING`
    pub redriven: Vec<Uuid>,

    /// `TRANSCRIBED` jobs whose enqueue failed again
    pub stalled: Vec<Uuid>,

    /// Stale jobs waiting on a collaborator; reported only
    pub waiting: Vec<Job>,
}

/// Everything a podscribe process needs, built from one config
pub struct Runtime {
    pub config: ResolvedConfig,
    pub store: Arc<SqliteJobStore>,
    pub artifacts: Arc<FsArtifactGateway>,
    pub journal: Arc<TransitionJournal>,
    pub queue: Arc<JsonlArticleQueue>,
    pub controller: Arc<JobLifecycleController>,
    pub submissions: SubmissionService,
    pub status: StatusQueryService,
    notifier: UnboundedSender<Notification>,
    notifications: Mutex<Option<UnboundedReceiver<Notification>>>,
}

impl Runtime {
    /// Open the state under `config.home` and wire the collaborators
    pub fn open(config: ResolvedConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.home)
            .with_context(|| format!("Failed to create {}", config.home.display()))?;

        let store = Arc::new(
            SqliteJobStore::open(config.database_path()).context("Failed to open job store")?,
        );
        let artifacts = Arc::new(FsArtifactGateway::new(&config.storage));
        let journal = Arc::new(TransitionJournal::new(config.journal_path()));
        let queue = Arc::new(JsonlArticleQueue::new(config.queue_path()));

        let (notifier, notifications) = mpsc::unbounded_channel();

        let engine = Arc::new(WhisperEngine::new(
            WhisperSettings {
                whisper_path: config.transcription.whisper_path.clone(),
                model: config.transcription.model.clone(),
                timeout: config.transcription.timeout(),
            },
            artifacts.clone(),
            notifier.clone(),
        ));
        let transcription = Arc::new(TranscriptionDispatcher::new(
            engine,
            config.transcription.task_prefix.clone(),
        ));

        let controller = Arc::new(
            JobLifecycleController::new(
                store.clone(),
                artifacts.clone(),
                transcription.clone(),
                ArticleDispatcher::new(queue.clone()),
            )
            .with_journal(journal.clone()),
        );

        let submissions = SubmissionService::new(
            config.upload.clone(),
            config.transcription.language.clone(),
            artifacts.clone(),
            transcription,
            controller.clone(),
        );
        let status = StatusQueryService::new(store.clone());

        info!(home = %config.home.display(), storage = %config.storage.display(), "Runtime ready");

        Ok(Self {
            config,
            store,
            artifacts,
            journal,
            queue,
            controller,
            submissions,
            status,
            notifier,
            notifications: Mutex::new(Some(notifications)),
        })
    }

    /// Sender for in-process notifications
    pub fn notifier(&self) -> UnboundedSender<Notification> {
        self.notifier.clone()
    }

    /// Start feeding notifications to the controller.
    ///
    /// Returns `None` if the pump is already running.
    pub fn spawn_pump(&self) -> Option<JoinHandle<()>> {
        let mut receiver = self
            .notifications
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())?;
        let controller = self.controller.clone();

        Some(tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                if let Err(e) = handle_notification(&controller, &notification).await {
                    warn!(error = %e, "Notification handling failed");
                }
            }
            debug!("Notification pump stopped");
        }))
    }

    /// Article worker using the configured generation backend
    pub fn article_worker(&self) -> ArticleWorker {
        let article = &self.config.article;
        ArticleWorker::new(
            self.queue.clone(),
            build_adapter(article),
            self.artifacts.clone(),
            Arc::new(ControllerSink::new(self.controller.clone())),
            WorkerSettings {
                action: article.action().to_string(),
                transcript_char_limit: article.transcript_char_limit,
                timeout: article.timeout(),
                retry: article.retry.clone(),
            },
        )
    }

    /// Poll a job until `done` holds for its status
    pub async fn wait_for(
        &self,
        job_id: Uuid,
        poll: Duration,
        done: impl Fn(JobStatus) -> bool,
    ) -> Result<Job, PipelineError> {
        let mut last = None;
        loop {
            let job = self.status.get(job_id).await?;
            if last != Some(job.status) {
                info!(%job_id, status = %job.status, "Job status");
                last = Some(job.status);
            }
            if done(job.status) {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Re-drive stale `TRANSCRIBED` jobs and report the other stale ones
    pub async fn reconcile(&self, stale_after: chrono::Duration) -> Result<ReconcileReport> {
        let stale = self
            .status
            .list_stale(stale_after)
            .await
            .context("Failed to list stale jobs")?;

        let mut report = ReconcileReport::default();
        for job in stale {
            if job.status != JobStatus::Transcribed {
                report.waiting.push(job);
                continue;
            }

            let job_id = job.job_id;
            match self.controller.redrive(job_id).await {
                Ok(EventOutcome::Applied(_)) => {
                    info!(%job_id, "Job re-driven");
                    report.redriven.push(job_id);
                }
                Ok(EventOutcome::Stalled { reason, .. }) => {
                    warn!(%job_id, %reason, "Job still stalled");
                    report.stalled.push(job_id);
                }
                Ok(EventOutcome::Ignored { status, .. }) => {
                    debug!(%job_id, %status, "Job moved on before re-drive");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to re-drive {}", job_id))
                }
            }
        }

        Ok(report)
    }
}

/// Generation backend for the article worker
fn build_adapter(article: &ArticleConfig) -> Arc<dyn Adapter> {
    match article.adapter {
        AdapterKind::Anthropic => Arc::new(AnthropicAdapter::from_env(article.max_tokens)),
        AdapterKind::Fabric => Arc::new(FabricAdapter::new(article.fabric_path.clone(), None)),
    }
}
