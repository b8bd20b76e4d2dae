//! JSONL-backed article queue.
//!
//! Append-only log with state derived from replay: an `enqueued` line per
//! message, an `acked` line once the worker has reported its outcome.
//! Unacked messages are redelivered on the next drain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::article::{ArticleQueue, ArticleRequest};

/// Errors that can occur with the article queue
#[derive(Debug, Error)]
pub enum ArticleQueueError {
    #[error("Queue message not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A line in the queue log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub timestamp: DateTime<Utc>,

    pub message_id: String,

    pub event_type: QueueEventType,

    /// The request (only on `enqueued`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<ArticleRequest>,
}

/// Types of queue events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    Enqueued,
    Acked,
}

/// A message with its current state (derived from replay)
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub request: ArticleRequest,
    pub enqueued_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn is_pending(&self) -> bool {
        self.acked_at.is_none()
    }
}

/// Result of enqueueing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// New message written
    Queued(String),

    /// A pending message for the same job already exists
    AlreadyQueued(String),
}

impl EnqueueResult {
    /// Message id regardless of result type
    pub fn id(&self) -> &str {
        match self {
            Self::Queued(id) | Self::AlreadyQueued(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Queue status summary
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub acked: usize,
}

/// JSONL-based article queue
pub struct JsonlArticleQueue {
    queue_path: PathBuf,

    /// Serializes replay-then-append sequences
    lock: Mutex<()>,
}

impl JsonlArticleQueue {
    pub fn new(queue_path: impl Into<PathBuf>) -> Self {
        Self {
            queue_path: queue_path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path to the queue file
    pub fn path(&self) -> &Path {
        &self.queue_path
    }

    async fn append_event(&self, event: &QueueEvent) -> Result<(), ArticleQueueError> {
        if let Some(parent) = self.queue_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events to build current state
    pub async fn replay(&self) -> Result<HashMap<String, QueueMessage>, ArticleQueueError> {
        let mut messages: HashMap<String, QueueMessage> = HashMap::new();

        if !self.queue_path.exists() {
            return Ok(messages);
        }

        let file = File::open(&self.queue_path).await?;
        let mut lines = BufReader::new(file).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let event: QueueEvent = serde_json::from_str(&line)?;
            Self::apply_event(&mut messages, event);
        }

        Ok(messages)
    }

    fn apply_event(messages: &mut HashMap<String, QueueMessage>, event: QueueEvent) {
        match event.event_type {
            QueueEventType::Enqueued => {
                if let Some(request) = event.request {
                    messages.insert(
                        event.message_id.clone(),
                        QueueMessage {
                            id: event.message_id,
                            request,
                            enqueued_at: event.timestamp,
                            acked_at: None,
                        },
                    );
                }
            }
            QueueEventType::Acked => {
                if let Some(message) = messages.get_mut(&event.message_id) {
                    message.acked_at = Some(event.timestamp);
                }
            }
        }
    }

    /// Enqueue a request (idempotent while a message for the job is pending)
    pub async fn push(&self, request: &ArticleRequest) -> Result<EnqueueResult, ArticleQueueError> {
        let _guard = self.lock.lock().await;

        let messages = self.replay().await?;
        if let Some(existing) = messages
            .values()
            .find(|m| m.is_pending() && m.request.job_id == request.job_id)
        {
            return Ok(EnqueueResult::AlreadyQueued(existing.id.clone()));
        }

        let message_id = Uuid::new_v4().to_string();
        let event = QueueEvent {
            timestamp: Utc::now(),
            message_id: message_id.clone(),
            event_type: QueueEventType::Enqueued,
            request: Some(request.clone()),
        };
        self.append_event(&event).await?;

        debug!(job_id = %request.job_id, message_id = %message_id, "Message enqueued");
        Ok(EnqueueResult::Queued(message_id))
    }

    /// Pending messages, oldest first
    pub async fn pending(&self) -> Result<Vec<QueueMessage>, ArticleQueueError> {
        let messages = self.replay().await?;
        let mut pending: Vec<QueueMessage> = messages
            .into_values()
            .filter(QueueMessage::is_pending)
            .collect();

        pending.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        Ok(pending)
    }

    /// Acknowledge a message once its outcome has been reported
    pub async fn ack(&self, message_id: &str) -> Result<(), ArticleQueueError> {
        let _guard = self.lock.lock().await;

        let messages = self.replay().await?;
        if !messages.contains_key(message_id) {
            return Err(ArticleQueueError::NotFound(message_id.to_string()));
        }

        let event = QueueEvent {
            timestamp: Utc::now(),
            message_id: message_id.to_string(),
            event_type: QueueEventType::Acked,
            request: None,
        };
        self.append_event(&event).await
    }

    /// Counts by state
    pub async fn status(&self) -> Result<QueueStatus, ArticleQueueError> {
        let messages = self.replay().await?;

        let mut status = QueueStatus::default();
        for message in messages.values() {
            if message.is_pending() {
                status.pending += 1;
            } else {
                status.acked += 1;
            }
        }

        Ok(status)
    }
}

#[async_trait]
impl ArticleQueue for JsonlArticleQueue {
    async fn enqueue(&self, request: &ArticleRequest) -> anyhow::Result<String> {
        let result = self.push(request).await?;
        Ok(result.id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(job_id: Uuid) -> ArticleRequest {
        ArticleRequest {
            job_id,
            user_id: "user-1".to_string(),
            file_name: "talk.mp3".to_string(),
            transcript_text: "Bonjour le monde".to_string(),
            audio_key: format!("user-1/audio/{}/talk.mp3", job_id),
        }
    }

    fn create_test_queue() -> (JsonlArticleQueue, TempDir) {
        let temp = TempDir::new().unwrap();
        let queue = JsonlArticleQueue::new(temp.path().join("article_queue.jsonl"));
        (queue, temp)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_while_pending() {
        let (queue, _temp) = create_test_queue();
        let job_id = Uuid::new_v4();

        let first = queue.push(&request(job_id)).await.unwrap();
        let second = queue.push(&request(job_id)).await.unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.id(), second.id());
        assert_eq!(queue.status().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_ack_removes_from_pending() {
        let (queue, _temp) = create_test_queue();
        let first = queue.push(&request(Uuid::new_v4())).await.unwrap();
        let second = queue.push(&request(Uuid::new_v4())).await.unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(
            pending.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec![first.id(), second.id()]
        );

        queue.ack(first.id()).await.unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id());

        let status = queue.status().await.unwrap();
        assert_eq!(status.pending, 1);
        assert_eq!(status.acked, 1);
    }

    #[tokio::test]
    async fn test_ack_unknown_message() {
        let (queue, _temp) = create_test_queue();
        let err = queue.ack("missing").await.unwrap_err();
        assert!(matches!(err, ArticleQueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_requeue_after_ack() {
        let (queue, _temp) = create_test_queue();
        let job_id = Uuid::new_v4();

        let first = queue.push(&request(job_id)).await.unwrap();
        queue.ack(first.id()).await.unwrap();
        let second = queue.push(&request(job_id)).await.unwrap();

        assert!(second.is_new());
        assert_ne!(first.id(), second.id());
    }
}
