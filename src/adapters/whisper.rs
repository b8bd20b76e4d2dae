//! Local Whisper transcription engine.
//!
//! `start` returns as soon as the task is spawned; the background task
//! pulls the audio from the artifact gateway, shells out to the `whisper`
//! binary, stores `transcript.json` and reports the outcome on the
//! notification channel, like a hosted engine would.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::dispatch::{TranscriptDocument, TranscriptionEngine, TranscriptionRequest};
use crate::domain::artifact::TRANSCRIPT_CONTENT_TYPE;
use crate::domain::{Notification, TranscriptionNotification, TranscriptionOutcome};
use crate::storage::ArtifactGateway;

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

/// Settings for the local engine
#[derive(Debug, Clone)]
pub struct WhisperSettings {
    pub whisper_path: String,
    pub model: String,
    pub timeout: Duration,
}

/// Transcription engine running the `whisper` CLI in the background
pub struct WhisperEngine {
    settings: WhisperSettings,
    artifacts: Arc<dyn ArtifactGateway>,
    notifier: UnboundedSender<Notification>,
}

impl WhisperEngine {
    pub fn new(
        settings: WhisperSettings,
        artifacts: Arc<dyn ArtifactGateway>,
        notifier: UnboundedSender<Notification>,
    ) -> Self {
        Self {
            settings,
            artifacts,
            notifier,
        }
    }
}

/// Whisper takes bare language codes (`fr`), not regional tags (`fr-FR`)
pub fn whisper_language(hint: &str) -> String {
    hint.split(['-', '_'])
        .next()
        .unwrap_or(hint)
        .to_lowercase()
}

#[async_trait]
impl TranscriptionEngine for WhisperEngine {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn start(&self, request: TranscriptionRequest) -> Result<()> {
        if self.notifier.is_closed() {
            anyhow::bail!("Notification channel is closed");
        }

        let binary = Path::new(&self.settings.whisper_path);
        if binary.is_absolute() && !binary.exists() {
            anyhow::bail!("Whisper binary not found: {}", binary.display());
        }

        let settings = self.settings.clone();
        let artifacts = self.artifacts.clone();
        let notifier = self.notifier.clone();

        tokio::spawn(async move {
            let task_name = request.task_name.clone();
            let outcome = match transcribe(&settings, artifacts.as_ref(), &request).await {
                Ok(()) => {
                    info!(task = %task_name, "Whisper transcription finished");
                    TranscriptionOutcome::Completed {
                        location: Some(request.output_key.clone()),
                    }
                }
                Err(e) => {
                    warn!(task = %task_name, error = %format!("{:#}", e), "Whisper transcription failed");
                    TranscriptionOutcome::Failed {
                        reason: Some(format!("{:#}", e)),
                    }
                }
            };

            let notification = Notification::Transcription(TranscriptionNotification {
                task_name,
                outcome,
            });
            if notifier.send(notification).is_err() {
                error!("Notification channel closed before transcription outcome was delivered");
            }
        });

        Ok(())
    }
}

/// Fetch the audio, run whisper and store the transcript document
async fn transcribe(
    settings: &WhisperSettings,
    artifacts: &dyn ArtifactGateway,
    request: &TranscriptionRequest,
) -> Result<()> {
    let audio = artifacts
        .get(&request.source_key)
        .await
        .with_context(|| format!("Failed to fetch audio {}", request.source_key))?;

    let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;
    let file_name = request
        .source_key
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("audio.mp3");
    let audio_path = temp_dir.path().join(file_name);
    tokio::fs::write(&audio_path, &audio)
        .await
        .context("Failed to stage audio for whisper")?;

    let language = whisper_language(&request.language);
    let run = Command::new(&settings.whisper_path)
        .arg(&audio_path)
        .arg("--model")
        .arg(&settings.model)
        .arg("--output_dir")
        .arg(temp_dir.path())
        .arg("--output_format")
        .arg("json")
        .arg("--language")
        .arg(&language)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = timeout(settings.timeout, run)
        .await
        .with_context(|| format!("Whisper timed out after {:?}", settings.timeout))?
        .context("Failed to run whisper")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Whisper failed: {}", stderr.trim());
    }

    let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
    let json_path = temp_dir.path().join(format!("{}.json", stem));
    let json_content = tokio::fs::read_to_string(&json_path)
        .await
        .context("Failed to read whisper output")?;
    let whisper: WhisperOutput =
        serde_json::from_str(&json_content).context("Failed to parse whisper JSON")?;

    let document = TranscriptDocument {
        text: whisper.text.trim().to_string(),
        language: Some(if whisper.language.is_empty() {
            language
        } else {
            whisper.language
        }),
        duration_seconds: whisper.segments.last().map(|s| s.end),
    };

    let bytes = serde_json::to_vec_pretty(&document).context("Failed to serialize transcript")?;
    artifacts
        .put(&request.output_key, &bytes, TRANSCRIPT_CONTENT_TYPE)
        .await
        .with_context(|| format!("Failed to store transcript {}", request.output_key))?;

    Ok(())
}
