//! Article generation worker.
//!
//! Drains the article queue: for each pending message it calls the
//! generation backend, stores the article, reports the outcome and only
//! then acks the message. A message whose outcome could not be delivered
//! stays pending and is retried on the next drain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, instrument, warn};

use super::prompt::{build_prompt, parse_article};
use super::retry::RetryPolicy;
use crate::adapters::{Adapter, GenerationError};
use crate::dispatch::{ArticleRequest, JsonlArticleQueue, QueueMessage};
use crate::domain::artifact::ARTICLE_CONTENT_TYPE;
use crate::domain::{
    artifact_key, ArticleNotification, ArticleOutcome, ArticleResult, ArtifactKind, ArtifactRef,
    Notification,
};
use crate::storage::ArtifactGateway;

/// Where the worker reports outcomes
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Deliver an outcome; an error leaves the queue message unacked
    async fn deliver(&self, notification: ArticleNotification) -> Result<()>;
}

#[async_trait]
impl OutcomeSink for UnboundedSender<Notification> {
    async fn deliver(&self, notification: ArticleNotification) -> Result<()> {
        self.send(Notification::Article(notification))
            .map_err(|_| anyhow::anyhow!("Notification channel closed"))
    }
}

/// Worker settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Model name (HTTP backends) or pattern name (Fabric)
    pub action: String,

    /// Transcript characters included in the prompt
    pub transcript_char_limit: usize,

    /// Per-call timeout
    pub timeout: Duration,

    pub retry: RetryPolicy,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,

    /// Messages left pending because their outcome was not delivered
    pub undelivered: usize,
}

impl DrainReport {
    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.undelivered
    }
}

/// Consumes the article queue
pub struct ArticleWorker {
    queue: Arc<JsonlArticleQueue>,
    adapter: Arc<dyn Adapter>,
    artifacts: Arc<dyn ArtifactGateway>,
    sink: Arc<dyn OutcomeSink>,
    settings: WorkerSettings,
}

impl ArticleWorker {
    pub fn new(
        queue: Arc<JsonlArticleQueue>,
        adapter: Arc<dyn Adapter>,
        artifacts: Arc<dyn ArtifactGateway>,
        sink: Arc<dyn OutcomeSink>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            adapter,
            artifacts,
            sink,
            settings,
        }
    }

    /// Check the generation backend is configured and reachable
    pub async fn check_backend(&self) -> Result<()> {
        self.adapter
            .health_check()
            .await
            .with_context(|| format!("Generation backend '{}' unavailable", self.adapter.name()))
    }

    /// Process every pending message once
    pub async fn drain(&self) -> Result<DrainReport> {
        let pending = self
            .queue
            .pending()
            .await
            .context("Failed to read article queue")?;

        let mut report = DrainReport::default();
        if pending.is_empty() {
            debug!("Article queue empty");
            return Ok(report);
        }

        info!(count = pending.len(), adapter = self.adapter.name(), "Draining article queue");

        for message in pending {
            match self.process(&message).await {
                Ok(true) => report.completed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    error!(message_id = %message.id, error = %format!("{:#}", e), "Outcome not delivered; message stays pending");
                    report.undelivered += 1;
                }
            }
        }

        Ok(report)
    }

    /// Drain the queue every `interval` until the task is dropped
    pub async fn run(&self, interval: Duration) {
        loop {
            if let Err(e) = self.drain().await {
                error!(error = %format!("{:#}", e), "Article worker pass failed");
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Generate, store, report, ack. Returns whether generation succeeded.
    #[instrument(skip(self, message), fields(job_id = %message.request.job_id, message_id = %message.id))]
    async fn process(&self, message: &QueueMessage) -> Result<bool> {
        let request = &message.request;
        let prompt = build_prompt(
            &request.file_name,
            &request.transcript_text,
            self.settings.transcript_char_limit,
        );

        let outcome = match self.generate(&prompt).await {
            Ok(text) => {
                let result = parse_article(&text);
                let article = self.store_article(request, &result).await;
                info!(titre = %result.titre, "Article generated");
                ArticleOutcome::Completed { result, article }
            }
            Err(reason) => {
                warn!(%reason, "Article generation failed");
                ArticleOutcome::Failed {
                    reason: Some(reason),
                }
            }
        };
        let succeeded = matches!(outcome, ArticleOutcome::Completed { .. });

        self.sink
            .deliver(ArticleNotification {
                job_id: request.job_id,
                outcome,
            })
            .await?;

        self.queue
            .ack(&message.id)
            .await
            .context("Failed to ack article message")?;

        Ok(succeeded)
    }

    /// Call the backend, retrying rate-limited attempts.
    ///
    /// Errors come back as the message recorded on the job.
    async fn generate(&self, prompt: &str) -> std::result::Result<String, String> {
        let policy = &self.settings.retry;
        let mut attempt = 1;

        loop {
            debug!(attempt, max = policy.max_attempts, "Calling generation backend");

            let error = match self
                .adapter
                .execute(&self.settings.action, prompt, self.settings.timeout)
                .await
            {
                Ok(output) => return Ok(output.content),
                Err(e) => e,
            };

            match GenerationError::find(&error) {
                Some(GenerationError::RateLimited { retry_after_ms }) => {
                    if !policy.allows_another(attempt) {
                        return Err(format!(
                            "Rate limit dépassé après {} tentatives",
                            attempt
                        ));
                    }
                    let delay = policy.backoff(attempt, Duration::from_millis(*retry_after_ms));
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "Rate limited, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Some(GenerationError::Overloaded) => {
                    return Err(
                        "IA temporairement surchargée. Merci de réessayer dans quelques instants."
                            .to_string(),
                    );
                }
                Some(other) => return Err(format!("Erreur API: {}", other)),
                None => return Err(format!("{:#}", error)),
            }
        }
    }

    /// Store the article next to the job's other artifacts.
    ///
    /// A storage failure does not fail the job; the result still travels in
    /// the notification.
    async fn store_article(
        &self,
        request: &ArticleRequest,
        result: &ArticleResult,
    ) -> Option<ArtifactRef> {
        let name = format!("article_{}.json", Utc::now().format("%Y%m%d_%H%M%S"));
        let key = artifact_key(&request.user_id, ArtifactKind::Article, request.job_id, &name);

        let bytes = match serde_json::to_vec_pretty(result) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to serialize article");
                return None;
            }
        };

        match self.artifacts.put(&key, &bytes, ARTICLE_CONTENT_TYPE).await {
            Ok(()) => Some(ArtifactRef::describe(
                ArtifactKind::Article,
                key,
                ARTICLE_CONTENT_TYPE,
                &bytes,
            )),
            Err(e) => {
                warn!(%key, error = %e, "Failed to store article");
                None
            }
        }
    }
}
