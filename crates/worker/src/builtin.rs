//! Handlers every worker ships with.

use chrono::Utc;
use serde_json::{Value, json};

use offload_core::DomainResult;

use crate::registry::HandlerRegistry;

/// Returns its arguments unchanged.
pub const ECHO: &str = "system/echo";
/// Liveness probe: returns `pong` and the worker's clock.
pub const PING: &str = "system/ping";

pub fn register(registry: &mut HandlerRegistry) -> DomainResult<()> {
    registry
        .register(ECHO, |args: Value| async move { Ok(args) })?
        .register(PING, |_| async {
            Ok(json!({
                "pong": true,
                "at": Utc::now().to_rfc3339(),
            }))
        })?;
    Ok(())
}
