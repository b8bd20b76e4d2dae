//! Job Lifecycle Integration Tests
//!
//! Drives jobs through the controller with in-memory collaborators and
//! checks the transition rules, duplicate handling and recovery paths.

mod common;

use common::*;
use podscribe::core::EventOutcome;
use podscribe::domain::{
    ArtifactKind, ArtifactRef, JobMetadata, JobStatus, DEFAULT_GENERATION_ERROR,
    DEFAULT_TRANSCRIPTION_ERROR,
};
use podscribe::error::PipelineError;
use podscribe::storage::ArtifactGateway;
use uuid::Uuid;

#[tokio::test]
async fn test_job_runs_to_completion() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Transcribing);
    assert_eq!(job.transcription_task, task_name(job_id));

    let outcome = harness
        .complete_transcription(job_id, "Bonjour et bienvenue.")
        .await;
    assert!(outcome.is_applied());
    assert_eq!(outcome.status(), JobStatus::Generating);

    let queued = harness.queue.requests();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].job_id, job_id);
    assert_eq!(queued[0].transcript_text, "Bonjour et bienvenue.");
    assert_eq!(queued[0].file_name, "emission.mp3");

    let outcome = harness
        .controller
        .on_article_event(&article_completed(job_id))
        .await
        .unwrap();
    assert!(outcome.is_applied());

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(sample_result()));
    assert_eq!(job.transcript_text.as_deref(), Some("Bonjour et bienvenue."));
    assert!(job.completed_at.is_some());
    assert!(job.transcribed_at.is_some());
    assert!(job.transcribed_at <= job.completed_at);
    assert!(job.error_message.is_none());
    assert!(job.artifact(ArtifactKind::Audio).is_some());
    assert!(job.artifact(ArtifactKind::Transcript).is_some());
    job.check_invariants().unwrap();

    let history = harness.journal.history(job_id).await.unwrap();
    let states: Vec<JobStatus> = history.iter().map(|e| e.to).collect();
    assert_eq!(
        states,
        vec![
            JobStatus::Transcribing,
            JobStatus::Transcribed,
            JobStatus::Generating,
            JobStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn test_transcription_failure_with_reason() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    let outcome = harness
        .controller
        .on_transcription_event(&transcription_failed(job_id, Some("Unsupported codec")))
        .await
        .unwrap();
    assert!(outcome.is_applied());

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::TranscriptionFailed);
    assert_eq!(job.error_message.as_deref(), Some("Unsupported codec"));
    assert!(job.transcript_text.is_none());
    assert!(harness.queue.requests().is_empty());
    job.check_invariants().unwrap();
}

#[tokio::test]
async fn test_transcription_failure_without_reason_uses_default() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    harness
        .controller
        .on_transcription_event(&transcription_failed(job_id, None))
        .await
        .unwrap();

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.error_message.as_deref(), Some(DEFAULT_TRANSCRIPTION_ERROR));
}

#[tokio::test]
async fn test_article_failure_without_reason_uses_default() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;
    harness.complete_transcription(job_id, "texte").await;

    harness
        .controller
        .on_article_event(&article_failed(job_id, None))
        .await
        .unwrap();

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(DEFAULT_GENERATION_ERROR));
    assert!(job.result.is_none());
    assert!(job.completed_at.is_none());
    job.check_invariants().unwrap();
}

#[tokio::test]
async fn test_redelivered_transcription_is_ignored() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;
    harness.complete_transcription(job_id, "texte").await;

    let before = harness.status.get(job_id).await.unwrap();

    let outcome = harness
        .controller
        .on_transcription_event(&transcription_completed(job_id, None))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Ignored {
            status: JobStatus::Generating,
            ..
        }
    ));

    let after = harness.status.get(job_id).await.unwrap();
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.artifact_refs, before.artifact_refs);
    assert_eq!(harness.queue.requests().len(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_enqueue_once() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;
    harness.put_transcript(job_id, "texte").await;

    let notification = transcription_completed(job_id, None);
    let (first, second) = tokio::join!(
        harness.controller.on_transcription_event(&notification),
        harness.controller.on_transcription_event(&notification),
    );
    let first = tokio_test::assert_ok!(first);
    let second = tokio_test::assert_ok!(second);

    let applied = [&first, &second].iter().filter(|o| o.is_applied()).count();
    assert_eq!(applied, 1);
    assert_eq!(harness.queue.requests().len(), 1);

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Generating);
    let transcripts = job
        .artifact_refs
        .iter()
        .filter(|a| a.kind == ArtifactKind::Transcript)
        .count();
    assert_eq!(transcripts, 1);
}

#[tokio::test]
async fn test_article_event_before_generation_is_ignored() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    let outcome = harness
        .controller
        .on_article_event(&article_completed(job_id))
        .await
        .unwrap();
    assert!(!outcome.is_applied());
    assert_eq!(outcome.status(), JobStatus::Transcribing);

    let job = harness.status.get(job_id).await.unwrap();
    assert!(job.result.is_none());
}

#[tokio::test]
async fn test_late_failure_does_not_override_progress() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;
    harness.complete_transcription(job_id, "texte").await;

    let outcome = harness
        .controller
        .on_transcription_event(&transcription_failed(job_id, Some("late")))
        .await
        .unwrap();
    assert!(!outcome.is_applied());

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Generating);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn test_terminal_jobs_ignore_everything() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;
    harness.complete_transcription(job_id, "texte").await;
    harness
        .controller
        .on_article_event(&article_completed(job_id))
        .await
        .unwrap();

    let done = harness.status.get(job_id).await.unwrap();

    let failed = harness
        .controller
        .on_article_event(&article_failed(job_id, Some("boom")))
        .await
        .unwrap();
    let again = harness
        .controller
        .on_transcription_event(&transcription_completed(job_id, None))
        .await
        .unwrap();
    assert!(!failed.is_applied());
    assert!(!again.is_applied());

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.updated_at, done.updated_at);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn test_enqueue_failure_stalls_then_redrive() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    harness.queue.set_failing(true);
    let outcome = harness.complete_transcription(job_id, "texte").await;
    match &outcome {
        EventOutcome::Stalled { job, reason } => {
            assert_eq!(job.status, JobStatus::Transcribed);
            assert!(reason.contains("queue unavailable"));
        }
        other => panic!("expected stalled job, got {:?}", other),
    }

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Transcribed);
    assert_eq!(job.transcript_text.as_deref(), Some("texte"));

    // Still down: stays put
    let outcome = harness.controller.redrive(job_id).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Stalled { .. }));

    harness.queue.set_failing(false);
    let outcome = harness.controller.redrive(job_id).await.unwrap();
    assert!(outcome.is_applied());
    assert_eq!(outcome.status(), JobStatus::Generating);
    assert_eq!(harness.queue.requests().len(), 1);

    let outcome = harness.controller.redrive(job_id).await.unwrap();
    assert!(!outcome.is_applied());
    assert_eq!(harness.queue.requests().len(), 1);
}

#[tokio::test]
async fn test_unreadable_transcript_fails_job() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    // Nothing stored at the default location
    harness
        .controller
        .on_transcription_event(&transcription_completed(job_id, None))
        .await
        .unwrap();

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::TranscriptionFailed);
    let message = job.error_message.unwrap();
    assert!(message.starts_with("Failed to read transcript"), "{}", message);
    assert!(harness.queue.requests().is_empty());
}

#[tokio::test]
async fn test_transcript_at_reported_location() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    let key = format!("{}/transcriptions/{}/custom.json", USER_ID, job_id);
    let body = serde_json::json!({
        "results": { "transcripts": [{ "transcript": "Texte alternatif" }] }
    });
    harness
        .artifacts
        .put(&key, body.to_string().as_bytes(), "application/json")
        .await
        .unwrap();

    harness
        .controller
        .on_transcription_event(&transcription_completed(job_id, Some(key.clone())))
        .await
        .unwrap();

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Generating);
    assert_eq!(job.transcript_text.as_deref(), Some("Texte alternatif"));
    let transcript: &ArtifactRef = job.artifact(ArtifactKind::Transcript).unwrap();
    assert_eq!(transcript.key, key);
    assert_eq!(transcript.sha256.len(), 64);
}

#[tokio::test]
async fn test_unknown_task_names_are_not_found() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;

    let mut foreign = transcription_completed(job_id, None);
    foreign.task_name = format!("other-{}", job_id);
    let err = harness
        .controller
        .on_transcription_event(&foreign)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let unknown = transcription_completed(Uuid::new_v4(), None);
    let err = harness
        .controller
        .on_transcription_event(&unknown)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = harness
        .controller
        .on_article_event(&article_completed(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::JobNotFound(_)));

    let job = harness.status.get(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Transcribing);
}

#[tokio::test]
async fn test_duplicate_submission_record_is_rejected() {
    let harness = Harness::new();
    let job_id = harness.submit("emission.mp3").await;
    let job = harness.status.get(job_id).await.unwrap();

    let metadata = JobMetadata {
        file_name: job.file_name.clone(),
        file_size: job.file_size,
        transcription_task: job.transcription_task.clone(),
        audio: job.artifact(ArtifactKind::Audio).cloned().unwrap(),
    };
    let err = harness
        .controller
        .on_submitted(job_id, owner(), metadata)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateJob(id) if id == job_id));
}
