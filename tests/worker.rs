//! Article Worker Integration Tests
//!
//! Drains a file-backed queue against a scripted generation backend.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use podscribe::adapters::{Adapter, AdapterOutput, GenerationError};
use podscribe::core::{JobLifecycleController, JobStore, MemoryJobStore, StatusQueryService};
use podscribe::dispatch::{
    ArticleDispatcher, ArticleRequest, JsonlArticleQueue, TranscriptionDispatcher,
};
use podscribe::domain::{
    ArticleOutcome, ArtifactKind, ArtifactRef, JobMetadata, JobStatus, Notification, Transition,
};
use podscribe::runtime::ControllerSink;
use podscribe::storage::{ArtifactGateway, MemoryArtifactGateway};
use podscribe::worker::{ArticleWorker, RetryPolicy, WorkerSettings, FALLBACK_TITLE};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

const RESPONSE: &str = "\
TITRE : Le marché revient
INTRODUCTION : Les étals sont de retour.
ARTICLE : Samedi matin, la place s'est remplie.
CONCLUSION : À la semaine prochaine.";

/// Backend replaying a fixed script of replies
struct ScriptedAdapter {
    replies: Mutex<VecDeque<std::result::Result<String, GenerationError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(replies: Vec<std::result::Result<String, GenerationError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, _action: &str, input: &str, _timeout: Duration) -> Result<AdapterOutput> {
        self.calls.lock().unwrap().push(input.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(AdapterOutput::new(text)),
            Some(Err(e)) => Err(anyhow::Error::new(e).context("Scripted request failed")),
            None => anyhow::bail!("script exhausted"),
        }
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

fn settings(max_attempts: u32) -> WorkerSettings {
    WorkerSettings {
        action: "test-model".to_string(),
        transcript_char_limit: 50_000,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        },
    }
}

fn request(job_id: Uuid) -> ArticleRequest {
    ArticleRequest {
        job_id,
        user_id: "user-1".to_string(),
        file_name: "emission.mp3".to_string(),
        transcript_text: "Bonjour à tous, bienvenue au marché.".to_string(),
        audio_key: format!("user-1/audio/{}/emission.mp3", job_id),
    }
}

struct Fixture {
    queue: Arc<JsonlArticleQueue>,
    artifacts: Arc<MemoryArtifactGateway>,
    adapter: Arc<ScriptedAdapter>,
    worker: ArticleWorker,
    notifications: mpsc::UnboundedReceiver<Notification>,
    _temp: TempDir,
}

fn fixture(replies: Vec<std::result::Result<String, GenerationError>>, max_attempts: u32) -> Fixture {
    let temp = TempDir::new().unwrap();
    let queue = Arc::new(JsonlArticleQueue::new(temp.path().join("article_queue.jsonl")));
    let artifacts = Arc::new(MemoryArtifactGateway::new());
    let adapter = Arc::new(ScriptedAdapter::new(replies));
    let (sender, notifications) = mpsc::unbounded_channel();

    let worker = ArticleWorker::new(
        queue.clone(),
        adapter.clone(),
        artifacts.clone(),
        Arc::new(sender),
        settings(max_attempts),
    );

    Fixture {
        queue,
        artifacts,
        adapter,
        worker,
        notifications,
        _temp: temp,
    }
}

fn article_outcome(notification: Notification) -> ArticleOutcome {
    match notification {
        Notification::Article(n) => n.outcome,
        other => panic!("unexpected notification: {:?}", other),
    }
}

#[tokio::test]
async fn test_drain_generates_stores_and_acks() {
    let mut fx = fixture(vec![Ok(RESPONSE.to_string())], 3);
    let job_id = Uuid::new_v4();
    fx.queue.push(&request(job_id)).await.unwrap();

    let report = fx.worker.drain().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(report.processed(), 1);
    assert!(fx.queue.pending().await.unwrap().is_empty());

    let prompt = &fx.adapter.calls()[0];
    assert!(prompt.contains("Fichier audio source : emission.mp3"));
    assert!(prompt.contains("Bonjour à tous"));

    match article_outcome(fx.notifications.recv().await.unwrap()) {
        ArticleOutcome::Completed { result, article } => {
            assert_eq!(result.titre, "Le marché revient");
            assert_eq!(result.conclusion, "À la semaine prochaine.");

            let article = article.unwrap();
            assert!(article
                .key
                .starts_with(&format!("user-1/articles/{}/article_", job_id)));
            let stored = fx.artifacts.get(&article.key).await.unwrap();
            let parsed: serde_json::Value = serde_json::from_slice(&stored).unwrap();
            assert_eq!(parsed["titre"], "Le marché revient");
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unstructured_reply_uses_fallback_title() {
    let mut fx = fixture(vec![Ok("Un texte libre.".to_string())], 1);
    fx.queue.push(&request(Uuid::new_v4())).await.unwrap();

    fx.worker.drain().await.unwrap();

    match article_outcome(fx.notifications.recv().await.unwrap()) {
        ArticleOutcome::Completed { result, .. } => {
            assert_eq!(result.titre, FALLBACK_TITLE);
            assert_eq!(result.article, "Un texte libre.");
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let limited = || Err(GenerationError::RateLimited { retry_after_ms: 1 });
    let mut fx = fixture(vec![limited(), limited(), Ok(RESPONSE.to_string())], 3);
    fx.queue.push(&request(Uuid::new_v4())).await.unwrap();

    let report = fx.worker.drain().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(fx.adapter.calls().len(), 3);
    assert!(matches!(
        article_outcome(fx.notifications.recv().await.unwrap()),
        ArticleOutcome::Completed { .. }
    ));
}

#[tokio::test]
async fn test_rate_limit_exhaustion_fails_job() {
    let limited = || Err(GenerationError::RateLimited { retry_after_ms: 1 });
    let mut fx = fixture(vec![limited(), limited(), limited()], 3);
    fx.queue.push(&request(Uuid::new_v4())).await.unwrap();

    let report = fx.worker.drain().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(fx.adapter.calls().len(), 3);

    match article_outcome(fx.notifications.recv().await.unwrap()) {
        ArticleOutcome::Failed { reason } => {
            assert_eq!(reason.as_deref(), Some("Rate limit dépassé après 3 tentatives"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(fx.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overload_fails_without_retry() {
    let mut fx = fixture(
        vec![Err(GenerationError::Overloaded), Ok(RESPONSE.to_string())],
        3,
    );
    fx.queue.push(&request(Uuid::new_v4())).await.unwrap();

    fx.worker.drain().await.unwrap();
    assert_eq!(fx.adapter.calls().len(), 1);

    match article_outcome(fx.notifications.recv().await.unwrap()) {
        ArticleOutcome::Failed { reason } => {
            assert!(reason.unwrap().starts_with("IA temporairement surchargée"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_api_error_message() {
    let mut fx = fixture(
        vec![Err(GenerationError::Api {
            status: 400,
            message: "bad prompt".to_string(),
        })],
        3,
    );
    fx.queue.push(&request(Uuid::new_v4())).await.unwrap();

    fx.worker.drain().await.unwrap();

    match article_outcome(fx.notifications.recv().await.unwrap()) {
        ArticleOutcome::Failed { reason } => {
            assert_eq!(reason.as_deref(), Some("Erreur API: API error 400: bad prompt"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undelivered_outcome_keeps_message_pending() {
    let fx = fixture(vec![Ok(RESPONSE.to_string())], 1);
    let Fixture {
        queue,
        worker,
        notifications,
        ..
    } = fx;
    drop(notifications);

    queue.push(&request(Uuid::new_v4())).await.unwrap();
    let report = worker.drain().await.unwrap();

    assert_eq!(report.undelivered, 1);
    assert_eq!(queue.pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_worker_completes_job_through_controller() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let artifacts = Arc::new(MemoryArtifactGateway::new());
    let queue = Arc::new(JsonlArticleQueue::new(temp.path().join("article_queue.jsonl")));
    let engine = Arc::new(common::RecordingEngine::default());

    let controller = Arc::new(JobLifecycleController::new(
        store.clone(),
        artifacts.clone(),
        Arc::new(TranscriptionDispatcher::new(engine, common::TASK_PREFIX)),
        ArticleDispatcher::new(queue.clone()),
    ));
    let status = StatusQueryService::new(store.clone());

    let job_id = Uuid::new_v4();
    let audio_key = format!("{}/audio/{}/emission.mp3", common::USER_ID, job_id);
    artifacts.put(&audio_key, b"audio", "audio/mpeg").await.unwrap();
    controller
        .on_submitted(
            job_id,
            common::owner(),
            podscribe::domain::JobMetadata {
                file_name: "emission.mp3".to_string(),
                file_size: 5,
                transcription_task: common::task_name(job_id),
                audio: ArtifactRef::describe(
                    ArtifactKind::Audio,
                    audio_key,
                    "audio/mpeg",
                    b"audio",
                ),
            },
        )
        .await
        .unwrap();

    let transcript_key = TranscriptionDispatcher::transcript_key(common::USER_ID, job_id);
    artifacts
        .put(&transcript_key, br#"{"text":"Bonjour"}"#, "application/json")
        .await
        .unwrap();
    controller
        .on_transcription_event(&common::transcription_completed(job_id, None))
        .await
        .unwrap();
    assert_eq!(queue.pending().await.unwrap().len(), 1);

    let adapter = Arc::new(ScriptedAdapter::new(vec![Ok(RESPONSE.to_string())]));
    let worker = ArticleWorker::new(
        queue.clone(),
        adapter,
        artifacts.clone(),
        Arc::new(ControllerSink::new(controller.clone())),
        settings(1),
    );
    let report = worker.drain().await.unwrap();
    assert_eq!(report.completed, 1);

    let job = status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.unwrap().titre, "Le marché revient");
    assert_eq!(job.artifact_refs.len(), 3);
    assert!(queue.pending().await.unwrap().is_empty());

    // A second drain has nothing left to do
    assert_eq!(worker.drain().await.unwrap().processed(), 0);
}

#[tokio::test]
async fn test_outcome_before_generating_commit_stays_pending() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let artifacts = Arc::new(MemoryArtifactGateway::new());
    let queue = Arc::new(JsonlArticleQueue::new(temp.path().join("article_queue.jsonl")));
    let engine = Arc::new(common::RecordingEngine::default());

    let controller = Arc::new(JobLifecycleController::new(
        store.clone(),
        artifacts.clone(),
        Arc::new(TranscriptionDispatcher::new(engine, common::TASK_PREFIX)),
        ArticleDispatcher::new(queue.clone()),
    ));
    let status = StatusQueryService::new(store.clone());

    let job_id = Uuid::new_v4();
    let audio_key = format!("{}/audio/{}/emission.mp3", common::USER_ID, job_id);
    controller
        .on_submitted(
            job_id,
            common::owner(),
            JobMetadata {
                file_name: "emission.mp3".to_string(),
                file_size: 5,
                transcription_task: common::task_name(job_id),
                audio: ArtifactRef::describe(ArtifactKind::Audio, audio_key, "audio/mpeg", b"audio"),
            },
        )
        .await
        .unwrap();

    // Request enqueued while the job still sits in TRANSCRIBED
    let transcript = ArtifactRef::describe(
        ArtifactKind::Transcript,
        TranscriptionDispatcher::transcript_key(common::USER_ID, job_id),
        "application/json",
        br#"{"text":"Bonjour"}"#,
    );
    store
        .transition(job_id, &Transition::transcribed("Bonjour".to_string(), transcript))
        .await
        .unwrap();
    queue.push(&request(job_id)).await.unwrap();

    let adapter = Arc::new(ScriptedAdapter::new(vec![
        Ok(RESPONSE.to_string()),
        Ok(RESPONSE.to_string()),
    ]));
    let worker = ArticleWorker::new(
        queue.clone(),
        adapter,
        artifacts.clone(),
        Arc::new(ControllerSink::new(controller.clone())),
        settings(1),
    );

    let report = worker.drain().await.unwrap();
    assert_eq!(report.undelivered, 1);
    assert_eq!(queue.pending().await.unwrap().len(), 1);

    store
        .transition(job_id, &Transition::generating())
        .await
        .unwrap();

    let report = worker.drain().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(queue.pending().await.unwrap().is_empty());
    assert_eq!(status.get(job_id).await.unwrap().status, JobStatus::Completed);
}
