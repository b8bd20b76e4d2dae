//! Read path over the job store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::job_store::JobStore;
use crate::domain::Job;
use crate::error::PipelineError;

/// Default number of jobs returned by `list_recent`
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Read-only projections of job records
pub struct StatusQueryService {
    store: Arc<dyn JobStore>,
}

impl StatusQueryService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Current record of a job
    pub async fn get(&self, job_id: Uuid) -> Result<Job, PipelineError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// A user's jobs, most recent first
    pub async fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<Job>, PipelineError> {
        Ok(self.store.list_by_user(user_id, limit).await?)
    }

    /// Non-terminal jobs untouched for longer than `older_than`
    pub async fn list_stale(&self, older_than: Duration) -> Result<Vec<Job>, PipelineError> {
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self.store.list_stale(cutoff).await?)
    }
}
