//! Tracing/logging setup shared by the worker binary and host applications.

/// Initialize process-wide tracing.
///
/// `verbose` raises the default level to `debug`; an explicit `RUST_LOG` always wins.
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(verbose: bool) {
    tracing::init(verbose);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
