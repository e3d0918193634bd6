//! Job record model shared by the store, the caller library and the worker.
//!
//! This crate contains **pure domain** types (no runtime or storage concerns).

pub mod env;
pub mod error;
pub mod handler_path;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use handler_path::{HandlerPath, HandlerRoot};
pub use id::JobId;
pub use job::{DEFAULT_STALE_AFTER, JobRecord, JobStats, JobStatus, NewJob};
