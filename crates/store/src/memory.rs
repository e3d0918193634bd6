//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use offload_core::{DEFAULT_STALE_AFTER, JobId, JobRecord, JobStats, NewJob};

use crate::store::{JobStore, JobStoreError};

/// In-memory job store.
///
/// Every mutation happens under one write lock, which makes `claim_next` atomic across
/// all tasks sharing the store. Expiry is lazy: expired records are hidden from reads
/// and only physically dropped by `purge_expired`.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    stale_after: Duration,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Override the staleness threshold used by `claim_next`.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Number of records physically held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn finish<F>(&self, id: JobId, transition: F) -> Result<bool, JobStoreError>
    where
        F: FnOnce(&mut JobRecord) -> bool,
    {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let now = Utc::now();
        match jobs.get_mut(&id) {
            Some(job) if !job.is_expired(now) => Ok(transition(job)),
            _ => Ok(false),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> JobStoreError {
    JobStoreError::Storage("in-memory job store lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn ensure_indexes(&self) -> Result<(), JobStoreError> {
        Ok(())
    }

    async fn create(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let id = JobId::new();
        jobs.insert(id, JobRecord::from_new(id, job));
        Ok(id)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let now = Utc::now();
        Ok(jobs.get(&id).filter(|j| !j.is_expired(now)).cloned())
    }

    async fn find_recent(
        &self,
        handler_path: &str,
        args: &Value,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let now = Utc::now();

        Ok(jobs
            .values()
            .filter(|j| {
                !j.is_expired(now)
                    && j.status.is_reusable()
                    && j.handler_path == handler_path
                    && &j.args == args
            })
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let now = Utc::now();

        // Oldest eligible record first (FIFO by created_at).
        let next = jobs
            .values()
            .filter(|j| j.is_claimable(now, self.stale_after))
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_processing(now);
                job.clone()
            })
        }))
    }

    async fn complete(&self, id: JobId, result: Value) -> Result<bool, JobStoreError> {
        self.finish(id, |job| job.mark_completed(result, Utc::now()))
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<bool, JobStoreError> {
        self.finish(id, |job| job.mark_failed(error, Utc::now()))
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let now = Utc::now();

        let mut stats = JobStats::default();
        for job in jobs.values().filter(|j| !j.is_expired(now)) {
            stats.record(job.status);
        }
        Ok(stats)
    }

    async fn purge_expired(&self) -> Result<u64, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let now = Utc::now();
        let before = jobs.len();
        jobs.retain(|_, j| !j.is_expired(now));
        Ok((before - jobs.len()) as u64)
    }
}
