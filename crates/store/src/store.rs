//! Job store contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use offload_core::{JobId, JobRecord, JobStats, NewJob};

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    /// The backing store could not be reached (pool closed, I/O, timeouts).
    #[error("connection error: {0}")]
    Connection(String),
    /// The backing store rejected or failed an operation.
    #[error("storage error: {0}")]
    Storage(String),
    /// A persisted record could not be turned back into a `JobRecord`.
    #[error("failed to decode job record: {0}")]
    Decode(String),
}

/// Persistence contract for job records.
///
/// ## Implementation Requirements
///
/// - Expired records (`expires_at <= now`) are invisible to every read and never claimed.
/// - `claim_next` is a single atomic read-modify-write: two callers racing on the same
///   record cannot both receive it.
/// - `complete`/`fail` only apply to records currently `processing`; a terminal record is
///   never overwritten. They return whether the transition happened.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Idempotent schema/index setup.
    async fn ensure_indexes(&self) -> Result<(), JobStoreError>;

    /// Insert a new `pending` record.
    async fn create(&self, job: NewJob) -> Result<JobId, JobStoreError>;

    /// Get a live record by ID.
    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Most recently created live record for the same handler and arguments whose status
    /// is `pending`, `processing` or `completed`.
    async fn find_recent(
        &self,
        handler_path: &str,
        args: &Value,
    ) -> Result<Option<JobRecord>, JobStoreError>;

    /// Claim the oldest pending (or stale processing) record.
    /// Returns None if nothing is eligible.
    async fn claim_next(&self) -> Result<Option<JobRecord>, JobStoreError>;

    /// Record a successful result.
    async fn complete(&self, id: JobId, result: Value) -> Result<bool, JobStoreError>;

    /// Record a failure message.
    async fn fail(&self, id: JobId, error: &str) -> Result<bool, JobStoreError>;

    /// Per-status counts over live records.
    async fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Remove every record past its `expires_at`. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, JobStoreError>;

    /// Release underlying connections. Further calls may fail.
    async fn close(&self) {}
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn ensure_indexes(&self) -> Result<(), JobStoreError> {
        (**self).ensure_indexes().await
    }

    async fn create(&self, job: NewJob) -> Result<JobId, JobStoreError> {
        (**self).create(job).await
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_recent(
        &self,
        handler_path: &str,
        args: &Value,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).find_recent(handler_path, args).await
    }

    async fn claim_next(&self) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).claim_next().await
    }

    async fn complete(&self, id: JobId, result: Value) -> Result<bool, JobStoreError> {
        (**self).complete(id, result).await
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<bool, JobStoreError> {
        (**self).fail(id, error).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }

    async fn purge_expired(&self) -> Result<u64, JobStoreError> {
        (**self).purge_expired().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}
