//! Worker configuration.

use std::time::Duration;

use offload_core::{HandlerRoot, env};

/// Configuration errors surfaced at daemon start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Worker daemon configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Shared secret every job must carry.
    pub secret: String,
    /// Root handler paths must resolve under.
    pub root: HandlerRoot,
    /// Maximum concurrent jobs in this process
    pub max_concurrent: usize,
    /// How long to wait when idle or at capacity
    pub poll_interval: Duration,
    /// How long to wait after a store error before claiming again
    pub error_backoff: Duration,
    /// Debug-level logging
    pub verbose: bool,
    /// Name for logging
    pub name: String,
}

impl WorkerConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            root: HandlerRoot::default(),
            max_concurrent: 20,
            poll_interval: Duration::from_millis(1000),
            error_backoff: Duration::from_secs(5),
            verbose: false,
            name: "offload-worker".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_root(mut self, root: HandlerRoot) -> Self {
        self.root = root;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup (the environment, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup(env::SECRET)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing(env::SECRET))?;

        let mut config = Self::new(secret);

        if let Some(raw) = lookup(env::HANDLER_ROOT) {
            config.root = HandlerRoot::new(&raw).map_err(|e| ConfigError::Invalid {
                name: env::HANDLER_ROOT,
                reason: e.to_string(),
            })?;
        }

        if let Some(raw) = lookup(env::MAX_CONCURRENT) {
            config.max_concurrent = parse_positive(env::MAX_CONCURRENT, &raw)? as usize;
        }

        if let Some(raw) = lookup(env::POLL_INTERVAL_MS) {
            config.poll_interval = Duration::from_millis(parse_positive(env::POLL_INTERVAL_MS, &raw)?);
        }

        config.verbose = lookup(env::VERBOSE).is_some_and(|v| env::is_truthy(&v));

        Ok(config)
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = WorkerConfig::from_lookup(lookup(&[(env::SECRET, "s3cret")])).unwrap();
        assert_eq!(config.secret, "s3cret");
        assert_eq!(config.max_concurrent, 20);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.root, HandlerRoot::default());
        assert!(!config.verbose);
    }

    #[test]
    fn secret_is_required() {
        assert_eq!(
            WorkerConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::Missing(env::SECRET)
        );
        assert_eq!(
            WorkerConfig::from_lookup(lookup(&[(env::SECRET, "")])).unwrap_err(),
            ConfigError::Missing(env::SECRET)
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = WorkerConfig::from_lookup(lookup(&[
            (env::SECRET, "s"),
            (env::MAX_CONCURRENT, "4"),
            (env::POLL_INTERVAL_MS, "250"),
            (env::VERBOSE, "true"),
            (env::HANDLER_ROOT, "/srv/app/handlers"),
        ]))
        .unwrap();

        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.verbose);
        assert_eq!(config.root.to_string(), "/srv/app/handlers");
    }

    #[test]
    fn zero_and_garbage_concurrency_are_rejected() {
        for bad in ["0", "-1", "lots"] {
            let err = WorkerConfig::from_lookup(lookup(&[
                (env::SECRET, "s"),
                (env::MAX_CONCURRENT, bad),
            ]))
            .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { name, .. } if name == env::MAX_CONCURRENT));
        }
    }

    #[test]
    fn relative_handler_root_is_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[
            (env::SECRET, "s"),
            (env::HANDLER_ROOT, "handlers"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
