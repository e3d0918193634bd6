//! Job store: the only component allowed to mutate job records.
//!
//! ## Components
//!
//! - `JobStore`: async persistence contract (create, lookups, atomic claim, terminal writes)
//! - `InMemoryJobStore`: single-process implementation for tests/dev
//! - `PostgresJobStore`: durable implementation shared by any number of workers
//! - `ExpirySweeper`: background task that removes records past `expires_at`
//!
//! Store errors propagate unmodified; retry policy belongs to callers.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod sweeper;

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;
pub use store::{JobStore, JobStoreError};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, ExpirySweeper, ExpirySweeperHandle};
