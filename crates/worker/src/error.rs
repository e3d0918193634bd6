//! Worker errors.

use offload_store::JobStoreError;

use crate::config::ConfigError;

/// Errors that stop a worker pool.
///
/// Per-job failures never show up here: they are recorded on the job record.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("job store setup failed: {0}")]
    Store(#[from] JobStoreError),

    #[error("worker task aborted: {0}")]
    Aborted(String),
}
