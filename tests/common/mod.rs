//! Shared fixtures for integration tests.
//!
//! In-memory fakes of the external collaborators plus a harness wiring them
//! to a real controller.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use podscribe::core::{
    EventOutcome, JobLifecycleController, JobStore, MemoryJobStore, StatusQueryService,
    SubmissionService, TransitionJournal, UploadPolicy,
};
use podscribe::dispatch::{
    ArticleDispatcher, ArticleQueue, ArticleRequest, TranscriptionDispatcher,
    TranscriptionEngine, TranscriptionRequest,
};
use podscribe::domain::{
    ArticleNotification, ArticleOutcome, ArticleResult, Owner, TranscriptionNotification,
    TranscriptionOutcome,
};
use podscribe::storage::{ArtifactGateway, MemoryArtifactGateway};
use tempfile::TempDir;
use uuid::Uuid;

pub const TASK_PREFIX: &str = "podscribe-";
pub const USER_ID: &str = "user-1";

/// Transcription engine that records requests
#[derive(Default)]
pub struct RecordingEngine {
    requests: Mutex<Vec<TranscriptionRequest>>,
    fail: AtomicBool,
}

impl RecordingEngine {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<TranscriptionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptionEngine for RecordingEngine {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self, request: TranscriptionRequest) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("engine unreachable");
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

/// Article queue that records requests
#[derive(Default)]
pub struct RecordingQueue {
    requests: Mutex<Vec<ArticleRequest>>,
    fail: AtomicBool,
}

impl RecordingQueue {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<ArticleRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArticleQueue for RecordingQueue {
    async fn enqueue(&self, request: &ArticleRequest) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("queue unavailable");
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("msg-{}", requests.len()))
    }
}

/// Controller, services and fakes wired together
pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub artifacts: Arc<MemoryArtifactGateway>,
    pub engine: Arc<RecordingEngine>,
    pub queue: Arc<RecordingQueue>,
    pub journal: Arc<TransitionJournal>,
    pub controller: Arc<JobLifecycleController>,
    pub submissions: SubmissionService,
    pub status: StatusQueryService,
    _temp: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(UploadPolicy::default())
    }

    pub fn with_policy(policy: UploadPolicy) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(MemoryArtifactGateway::new());
        let engine = Arc::new(RecordingEngine::default());
        let queue = Arc::new(RecordingQueue::default());
        let journal = Arc::new(TransitionJournal::new(temp.path().join("job_events.jsonl")));

        let transcription = Arc::new(TranscriptionDispatcher::new(engine.clone(), TASK_PREFIX));
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
            policy,
            "fr-FR",
            artifacts.clone(),
            transcription,
            controller.clone(),
        );
        let status = StatusQueryService::new(store.clone());

        Self {
            store,
            artifacts,
            engine,
            queue,
            journal,
            controller,
            submissions,
            status,
            _temp: temp,
        }
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// Submit a small valid upload and return its job id
    pub async fn submit(&self, file_name: &str) -> Uuid {
        self.submissions
            .submit(&[7u8; 2048], file_name, owner())
            .await
            .unwrap()
            .job_id
    }

    /// Store a transcript at the default location
    pub async fn put_transcript(&self, job_id: Uuid, text: &str) -> String {
        let key = TranscriptionDispatcher::transcript_key(USER_ID, job_id);
        let body = serde_json::json!({ "text": text, "language": "fr" });
        self.artifacts
            .put(&key, body.to_string().as_bytes(), "application/json")
            .await
            .unwrap();
        key
    }

    /// Store a transcript and report the transcription as completed
    pub async fn complete_transcription(&self, job_id: Uuid, text: &str) -> EventOutcome {
        self.put_transcript(job_id, text).await;
        self.controller
            .on_transcription_event(&transcription_completed(job_id, None))
            .await
            .unwrap()
    }
}

pub fn owner() -> Owner {
    Owner {
        user_id: USER_ID.to_string(),
        user_email: "user-1@example.com".to_string(),
    }
}

pub fn task_name(job_id: Uuid) -> String {
    format!("{}{}", TASK_PREFIX, job_id)
}

pub fn transcription_completed(job_id: Uuid, location: Option<String>) -> TranscriptionNotification {
    TranscriptionNotification {
        task_name: task_name(job_id),
        outcome: TranscriptionOutcome::Completed { location },
    }
}

pub fn transcription_failed(job_id: Uuid, reason: Option<&str>) -> TranscriptionNotification {
    TranscriptionNotification {
        task_name: task_name(job_id),
        outcome: TranscriptionOutcome::Failed {
            reason: reason.map(str::to_string),
        },
    }
}

pub fn sample_result() -> ArticleResult {
    ArticleResult {
        titre: "Le marché du samedi".to_string(),
        introduction: "Une matinée au marché.".to_string(),
        article: "Les producteurs locaux reviennent.".to_string(),
        conclusion: "Rendez-vous samedi prochain.".to_string(),
    }
}

pub fn article_completed(job_id: Uuid) -> ArticleNotification {
    ArticleNotification {
        job_id,
        outcome: ArticleOutcome::Completed {
            result: sample_result(),
            article: None,
        },
    }
}

pub fn article_failed(job_id: Uuid, reason: Option<&str>) -> ArticleNotification {
    ArticleNotification {
        job_id,
        outcome: ArticleOutcome::Failed {
            reason: reason.map(str::to_string),
        },
    }
}
