//! Environment variable names shared by the worker binary and host applications.

/// Shared secret embedded in every job and re-validated by the worker.
pub const SECRET: &str = "OFFLOAD_WORKER_SECRET";

/// Absolute root handler paths must resolve under.
pub const HANDLER_ROOT: &str = "OFFLOAD_HANDLER_ROOT";

/// Maximum jobs a single worker runs at once.
pub const MAX_CONCURRENT: &str = "OFFLOAD_MAX_CONCURRENT";

/// Delay between claim attempts when idle or at capacity, in milliseconds.
pub const POLL_INTERVAL_MS: &str = "OFFLOAD_POLL_INTERVAL_MS";

/// `1`, `true` or `yes` turns on debug logging.
pub const VERBOSE: &str = "OFFLOAD_VERBOSE";

/// Postgres connection string.
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Interpret a flag-style variable value.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
