//! Worker daemon: claims jobs from the shared store and runs them through registered
//! handlers with bounded concurrency.
//!
//! ## Design
//!
//! - Handlers live in a compile-time `HandlerRegistry`; unknown names fail closed
//! - Every claimed job is validated (secret, path boundary, handler lookup) before it runs
//! - A semaphore caps in-flight jobs per process; any number of processes may share a store
//! - Shutdown stops claiming, drains in-flight jobs, then releases the store
//!
//! Execution is at-least-once: a job whose worker dies mid-run is claimed again once its
//! `started_at` is older than the staleness threshold. Handlers must be idempotent.

pub mod builtin;
pub mod config;
pub mod error;
pub mod pool;
pub mod registry;

pub use config::{ConfigError, WorkerConfig};
pub use error::WorkerError;
pub use pool::{ShutdownTrigger, WorkerPool, WorkerPoolHandle, WorkerStats};
pub use registry::{HandlerFuture, HandlerRegistry};
