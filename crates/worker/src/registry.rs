//! Handler registry.
//!
//! Handlers are registered at startup under canonical relative names (`ai/summarize`)
//! and looked up by the normalized path of each job. Names are normalized exactly like
//! job paths, so a name that could never match a job is rejected at registration.
//! Lookup fails closed: an unknown name is a validation failure, never a filesystem search.
//!
//! Handlers run at-least-once and must be idempotent.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use offload_core::{DomainResult, HandlerPath, HandlerRoot};

/// Boxed future returned by a registered handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// A registered handler: JSON arguments in, JSON result (or error) out.
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Name → handler mapping.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler over raw JSON.
    ///
    /// `name` is resolved against the default handler root; names outside it are an error.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F) -> DomainResult<&mut Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let path = HandlerRoot::default().resolve(name)?;
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)) as HandlerFuture);
        self.handlers.insert(path.as_str().to_string(), handler);
        Ok(self)
    }

    /// Register a handler with typed arguments and result.
    ///
    /// Arguments that do not decode into `A` fail the job with an `invalid arguments`
    /// message; the handler is not called.
    pub fn register_typed<A, R, F, Fut>(&mut self, name: &str, handler: F) -> DomainResult<&mut Self>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(name, move |args| {
            let handler = handler.clone();
            async move {
                let args: A = serde_json::from_value(args)
                    .map_err(|e| anyhow::anyhow!("invalid arguments: {e}"))?;
                let result = handler(args).await?;
                Ok(serde_json::to_value(result)?)
            }
        })
    }

    pub fn get(&self, path: &HandlerPath) -> Option<Handler> {
        self.handlers.get(path.as_str()).cloned()
    }

    pub fn contains(&self, path: &HandlerPath) -> bool {
        self.handlers.contains_key(path.as_str())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> HandlerPath {
        HandlerRoot::default().resolve(raw).unwrap()
    }

    #[tokio::test]
    async fn registered_handler_is_found_by_resolved_path() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("./ai/summarize", |args| async move { Ok(json!({"echo": args})) })
            .unwrap();

        let handler = registry.get(&path("ai/./summarize")).unwrap();
        let result = handler(json!(1)).await.unwrap();
        assert_eq!(result, json!({"echo": 1}));
    }

    #[test]
    fn unknown_names_fail_closed() {
        let registry = HandlerRegistry::new();
        assert!(registry.get(&path("missing")).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn typed_handlers_decode_arguments() {
        #[derive(serde::Deserialize)]
        struct Add {
            a: i64,
            b: i64,
        }

        let mut registry = HandlerRegistry::new();
        registry
            .register_typed("math/add", |args: Add| async move { Ok(args.a + args.b) })
            .unwrap();
        let handler = registry.get(&path("math/add")).unwrap();

        assert_eq!(handler(json!({"a": 40, "b": 2})).await.unwrap(), json!(42));

        let err = handler(json!({"a": "forty"})).await.unwrap_err();
        assert!(err.to_string().starts_with("invalid arguments"));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("b", |_| async { Ok(Value::Null) })
            .unwrap()
            .register("a", |_| async { Ok(Value::Null) })
            .unwrap();
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn names_normalize_like_job_paths() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("reports/../ai/summarize", |_| async { Ok(Value::Null) })
            .unwrap()
            .register("/handlers/billing/invoice", |_| async { Ok(Value::Null) })
            .unwrap();

        assert!(registry.contains(&path("ai/summarize")));
        assert!(registry.contains(&path("billing/invoice")));
        assert_eq!(registry.names(), vec!["ai/summarize", "billing/invoice"]);
    }

    #[test]
    fn names_outside_the_root_are_rejected() {
        let mut registry = HandlerRegistry::new();
        for name in ["../escape", "/etc/passwd", "", "/handlers"] {
            assert!(
                registry.register(name, |_| async { Ok(Value::Null) }).is_err(),
                "{name:?} should be rejected"
            );
        }
        assert!(registry.is_empty());
    }
}
