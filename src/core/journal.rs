//! Append-only transition journal.
//!
//! One JSONL line per committed transition. The job store holds current
//! state; the journal is the audit trail behind `podscribe history`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::JobEvent;

/// File-based journal using JSONL format
pub struct TransitionJournal {
    path: PathBuf,

    /// Serializes appends from concurrent handlers
    write_lock: Mutex<()>,
}

impl TransitionJournal {
    /// Open a journal at `path` (created on first append)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path to the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record
    pub async fn append(&self, event: &JobEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize journal record")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write journal record")?;
        file.flush().await.context("Failed to flush journal")?;

        Ok(())
    }

    /// Replay all records in order
    pub async fn replay(&self) -> Result<Vec<JobEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: JobEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse journal record: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Records for one job, oldest first
    pub async fn history(&self, job_id: Uuid) -> Result<Vec<JobEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(|e| e.job_id == job_id).collect())
    }
}
