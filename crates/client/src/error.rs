//! Caller-side errors.

use std::time::Duration;

use thiserror::Error;

use offload_core::{DomainError, JobId};
use offload_store::JobStoreError;

/// Everything `Client::call_remote` can fail with.
///
/// `JobFailed` carries the message the worker stored; `Timeout` and `JobExpired` are
/// local and never mutate the record.
#[derive(Debug, Error)]
pub enum CallError {
    /// Rejected before any store access.
    #[error(transparent)]
    InvalidHandlerPath(DomainError),

    /// The worker recorded a failure for this job.
    #[error("{message}")]
    JobFailed { job_id: JobId, message: String },

    /// No terminal state observed before the deadline. The job is left in place.
    #[error("job {job_id} did not finish within {timeout:?}")]
    Timeout { job_id: JobId, timeout: Duration },

    /// The record disappeared (past its `expires_at`) while being polled.
    #[error("job {0} expired before it finished")]
    JobExpired(JobId),

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error("failed to encode arguments: {0}")]
    Encode(String),

    #[error("failed to decode result: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }

    /// The job this error refers to, when one was created or reused.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            CallError::JobFailed { job_id, .. } | CallError::Timeout { job_id, .. } => {
                Some(*job_id)
            }
            CallError::JobExpired(job_id) => Some(*job_id),
            _ => None,
        }
    }
}
