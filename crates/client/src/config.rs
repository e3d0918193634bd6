//! Caller configuration.

use offload_core::{HandlerRoot, env};

use crate::error::CallError;

/// What a caller embeds in every job it creates.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Shared secret the worker re-validates.
    pub secret: String,
    /// Root handler paths must resolve under.
    pub root: HandlerRoot,
}

impl ClientConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            root: HandlerRoot::default(),
        }
    }

    pub fn with_root(mut self, root: HandlerRoot) -> Self {
        self.root = root;
        self
    }

    /// Read `OFFLOAD_WORKER_SECRET` and the optional `OFFLOAD_HANDLER_ROOT`.
    pub fn from_env() -> Result<Self, CallError> {
        let secret = std::env::var(env::SECRET)
            .map_err(|_| CallError::Config(format!("{} must be set", env::SECRET)))?;

        let root = match std::env::var(env::HANDLER_ROOT) {
            Ok(raw) => HandlerRoot::new(&raw)
                .map_err(|e| CallError::Config(format!("{}: {e}", env::HANDLER_ROOT)))?,
            Err(_) => HandlerRoot::default(),
        };

        Ok(Self { secret, root })
    }
}
