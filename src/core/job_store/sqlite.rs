//! SQLite job store.
//!
//! One row per job. Artifact references and the article result are kept as
//! JSON columns; timestamps as fixed-width RFC 3339 strings so they sort
//! lexically.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::{stage, Commit, JobStore, Staged, StoreError};
use crate::domain::{Job, JobStatus, Transition};

const SELECT_COLUMNS: &str = "job_id, user_id, user_email, status, file_name, file_size, \
     transcription_task, artifact_refs, transcript_text, result, error_message, \
     created_at, updated_at, transcribed_at, completed_at";

/// Job store backed by a SQLite database
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;

        debug!(path = %path.display(), "Job store opened");
        Ok(store)
    }

    /// In-memory database (tests)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              job_id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              user_email TEXT NOT NULL,
              status TEXT NOT NULL,
              file_name TEXT NOT NULL,
              file_size INTEGER NOT NULL,
              transcription_task TEXT NOT NULL,
              artifact_refs TEXT NOT NULL,
              transcript_text TEXT,
              result TEXT,
              error_message TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              transcribed_at TEXT,
              completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_user_created ON jobs(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at);
            "#,
        )?;
        Ok(())
    }

    fn read(conn: &Connection, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE job_id = ?1", SELECT_COLUMNS),
                params![job_id.to_string()],
                RawJob::from_row,
            )
            .optional()?;

        raw.map(RawJob::into_job).transpose()
    }

    fn query(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Job>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, RawJob::from_row)?;

        let mut jobs = Vec::new();
        for raw in rows {
            jobs.push(raw?.into_job()?);
        }
        Ok(jobs)
    }

    /// Overwrite `updated_at` (for staleness tests)
    pub fn backdate(&self, job_id: Uuid, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE jobs SET updated_at = ?1 WHERE job_id = ?2",
            params![timestamp(&updated_at), job_id.to_string()],
        )?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let result = conn.execute(
            r#"
            INSERT INTO jobs (
              job_id, user_id, user_email, status, file_name, file_size,
              transcription_task, artifact_refs, transcript_text, result,
              error_message, created_at, updated_at, transcribed_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                job.job_id.to_string(),
                job.user_id,
                job.user_email,
                job.status.as_str(),
                job.file_name,
                job.file_size as i64,
                job.transcription_task,
                serde_json::to_string(&job.artifact_refs)?,
                job.transcript_text,
                job.result.as_ref().map(serde_json::to_string).transpose()?,
                job.error_message,
                timestamp(&job.created_at),
                timestamp(&job.updated_at),
                job.transcribed_at.as_ref().map(timestamp),
                job.completed_at.as_ref().map(timestamp),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate(job.job_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let conn = self.conn()?;
        Self::read(&conn, job_id)
    }

    async fn transition(
        &self,
        job_id: Uuid,
        transition: &Transition,
    ) -> Result<Commit, StoreError> {
        let conn = self.conn()?;
        let stored = Self::read(&conn, job_id)?;

        let (expected, job) = match stage(stored, transition)? {
            Staged::NotFound => return Ok(Commit::NotFound),
            Staged::Skipped { current } => return Ok(Commit::Skipped { current }),
            Staged::Write { expected, job } => (expected, job),
        };

        let changed = conn.execute(
            r#"
            UPDATE jobs SET
              status = ?1,
              artifact_refs = ?2,
              transcript_text = ?3,
              result = ?4,
              error_message = ?5,
              updated_at = ?6,
              transcribed_at = ?7,
              completed_at = ?8
            WHERE job_id = ?9 AND status = ?10
            "#,
            params![
                job.status.as_str(),
                serde_json::to_string(&job.artifact_refs)?,
                job.transcript_text,
                job.result.as_ref().map(serde_json::to_string).transpose()?,
                job.error_message,
                timestamp(&job.updated_at),
                job.transcribed_at.as_ref().map(timestamp),
                job.completed_at.as_ref().map(timestamp),
                job_id.to_string(),
                expected.as_str(),
            ],
        )?;

        if changed == 0 {
            // Another writer moved the row between the read and the update
            let current = Self::read(&conn, job_id)?
                .map(|j| j.status)
                .unwrap_or(expected);
            return Ok(Commit::Skipped { current });
        }

        Ok(Commit::Applied(job))
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Self::query(
            &conn,
            &format!(
                "SELECT {} FROM jobs WHERE user_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                SELECT_COLUMNS
            ),
            params![user_id, limit],
        )
    }

    async fn list_stale(&self, updated_before: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn()?;
        let cutoff = timestamp(&updated_before);
        Self::query(
            &conn,
            &format!(
                "SELECT {} FROM jobs \
                 WHERE status IN ('TRANSCRIBING', 'TRANSCRIBED', 'GENERATING') \
                 AND updated_at < ?1 ORDER BY updated_at ASC",
                SELECT_COLUMNS
            ),
            params![cutoff],
        )
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Row as stored, before decoding
struct RawJob {
    job_id: String,
    user_id: String,
    user_email: String,
    status: String,
    file_name: String,
    file_size: i64,
    transcription_task: String,
    artifact_refs: String,
    transcript_text: Option<String>,
    result: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
    transcribed_at: Option<String>,
    completed_at: Option<String>,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            user_id: row.get(1)?,
            user_email: row.get(2)?,
            status: row.get(3)?,
            file_name: row.get(4)?,
            file_size: row.get(5)?,
            transcription_task: row.get(6)?,
            artifact_refs: row.get(7)?,
            transcript_text: row.get(8)?,
            result: row.get(9)?,
            error_message: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            transcribed_at: row.get(13)?,
            completed_at: row.get(14)?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            job_id: self.job_id.clone(),
            reason,
        };

        let job_id = Uuid::parse_str(&self.job_id).map_err(|e| corrupt(e.to_string()))?;
        let status: JobStatus = self.status.parse().map_err(|e| corrupt(format!("{}", e)))?;
        let file_size = u64::try_from(self.file_size).map_err(|e| corrupt(e.to_string()))?;
        let parse_time = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp {}: {}", value, e)))
        };

        Ok(Job {
            job_id,
            status,
            file_size,
            artifact_refs: serde_json::from_str(&self.artifact_refs)?,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            transcribed_at: self.transcribed_at.as_deref().map(parse_time).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            user_id: self.user_id,
            user_email: self.user_email,
            file_name: self.file_name,
            transcription_task: self.transcription_task,
            transcript_text: self.transcript_text,
            error_message: self.error_message,
        })
    }
}
