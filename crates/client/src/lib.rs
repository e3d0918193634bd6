//! Caller library: an awaitable call over the asynchronous job protocol.
//!
//! `Client::call_remote` enqueues (or reuses) a job record, polls it, and returns the
//! handler's result as if the call had run in-process.

pub mod call;
pub mod config;
pub mod error;

pub use call::{CallOptions, Client, Submission};
pub use config::ClientConfig;
pub use error::CallError;
