//! In-memory job store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{stage, Commit, JobStore, Staged, StoreError};
use crate::domain::{Job, Transition};

/// Job store over a map; records carry an insertion sequence so listings
/// stay ordered when timestamps tie
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, (u64, Job)>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite `updated_at` (for staleness tests)
    pub fn backdate(&self, job_id: Uuid, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some((_, job)) = jobs.get_mut(&job_id) {
            job.updated_at = updated_at;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().map_err(|_| StoreError::LockPoisoned)?;
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::Duplicate(job.job_id));
        }

        let seq = jobs.len() as u64;
        jobs.insert(job.job_id, (seq, job.clone()));
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(jobs.get(&job_id).map(|(_, job)| job.clone()))
    }

    async fn transition(
        &self,
        job_id: Uuid,
        transition: &Transition,
    ) -> Result<Commit, StoreError> {
        let mut jobs = self.jobs.lock().map_err(|_| StoreError::LockPoisoned)?;
        let stored = jobs.get(&job_id).map(|(_, job)| job.clone());

        match stage(stored, transition)? {
            Staged::NotFound => Ok(Commit::NotFound),
            Staged::Skipped { current } => Ok(Commit::Skipped { current }),
            Staged::Write { job, .. } => {
                if let Some(entry) = jobs.get_mut(&job_id) {
                    entry.1 = job.clone();
                }
                Ok(Commit::Applied(job))
            }
        }
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut owned: Vec<&(u64, Job)> = jobs
            .values()
            .filter(|(_, job)| job.user_id == user_id)
            .collect();

        owned.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.0.cmp(&a.0))
        });

        Ok(owned
            .into_iter()
            .take(limit)
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn list_stale(&self, updated_before: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut stale: Vec<Job> = jobs
            .values()
            .map(|(_, job)| job)
            .filter(|job| !job.status.is_terminal() && job.updated_at < updated_before)
            .cloned()
            .collect();

        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(stale)
    }
}
