//! `call_remote`: submit, poll, collect.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use offload_core::{JobId, JobStatus, NewJob};
use offload_store::JobStore;

use crate::config::ClientConfig;
use crate::error::CallError;

/// Per-call overrides.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Total time to wait for a terminal state.
    pub timeout: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Lifetime of a newly created record (and so of its cached result).
    pub cache_ttl: Duration,
    /// Always enqueue a fresh job instead of reusing a matching one.
    pub skip_cache: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(55),
            poll_interval: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(60 * 60),
            skip_cache: false,
        }
    }
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

/// Outcome of the submit half of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// A matching record had already completed; its result is reused as-is.
    Cached(Value),
    /// A matching pending/processing record is being reused.
    Attached(JobId),
    /// A new record was created.
    Created(JobId),
}

/// Caller-side handle over a job store.
#[derive(Debug, Clone)]
pub struct Client<S> {
    store: S,
    config: ClientConfig,
}

impl<S: JobStore> Client<S> {
    pub fn new(store: S, config: ClientConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `handler_path` with `args` on a worker and wait for its result.
    ///
    /// Identical calls (same handler, same arguments) collapse onto one execution while
    /// the first record is live, unless `options.skip_cache` is set.
    pub async fn call_remote(
        &self,
        handler_path: &str,
        args: Value,
        options: CallOptions,
    ) -> Result<Value, CallError> {
        let started = Instant::now();
        match self.submit(handler_path, args, &options).await? {
            Submission::Cached(result) => Ok(result),
            Submission::Attached(job_id) | Submission::Created(job_id) => {
                self.wait(job_id, &options, started).await
            }
        }
    }

    /// Typed wrapper over [`Client::call_remote`].
    pub async fn call_remote_as<A, R>(
        &self,
        handler_path: &str,
        args: &A,
        options: CallOptions,
    ) -> Result<R, CallError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args).map_err(|e| CallError::Encode(e.to_string()))?;
        let result = self.call_remote(handler_path, args, options).await?;
        serde_json::from_value(result).map_err(|e| CallError::Decode(e.to_string()))
    }

    /// Validate the path, then reuse a matching record or create a new one.
    pub async fn submit(
        &self,
        handler_path: &str,
        args: Value,
        options: &CallOptions,
    ) -> Result<Submission, CallError> {
        let path = self
            .config
            .root
            .resolve(handler_path)
            .map_err(CallError::InvalidHandlerPath)?;

        if !options.skip_cache {
            if let Some(existing) = self.store.find_recent(path.as_str(), &args).await? {
                match existing.status {
                    JobStatus::Completed => {
                        debug!(job_id = %existing.id, handler = %path, "reusing completed job");
                        return Ok(Submission::Cached(existing.result.unwrap_or(Value::Null)));
                    }
                    JobStatus::Pending | JobStatus::Processing => {
                        debug!(job_id = %existing.id, handler = %path, "attaching to in-flight job");
                        return Ok(Submission::Attached(existing.id));
                    }
                    JobStatus::Failed => {}
                }
            }
        }

        let job_id = self
            .store
            .create(NewJob::new(&path, args, self.config.secret.clone(), options.cache_ttl))
            .await?;
        debug!(job_id = %job_id, handler = %path, "created job");
        Ok(Submission::Created(job_id))
    }

    /// Poll `job_id` until it reaches a terminal state or the deadline passes.
    ///
    /// `started` anchors the deadline so time spent submitting counts against the timeout.
    pub async fn wait(
        &self,
        job_id: JobId,
        options: &CallOptions,
        started: Instant,
    ) -> Result<Value, CallError> {
        // A timeout too large to represent as an instant means no deadline.
        let deadline = started.checked_add(options.timeout);

        loop {
            let delay = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CallError::Timeout {
                            job_id,
                            timeout: options.timeout,
                        });
                    }
                    options.poll_interval.min(deadline - now)
                }
                None => options.poll_interval,
            };
            tokio::time::sleep(delay).await;

            let Some(job) = self.store.find_by_id(job_id).await? else {
                return Err(CallError::JobExpired(job_id));
            };

            match job.status {
                JobStatus::Completed => return Ok(job.result.unwrap_or(Value::Null)),
                JobStatus::Failed => {
                    return Err(CallError::JobFailed {
                        job_id,
                        message: job.error.unwrap_or_else(|| "job failed".to_string()),
                    });
                }
                JobStatus::Pending | JobStatus::Processing => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use offload_store::InMemoryJobStore;
    use serde_json::json;

    fn client() -> Client<Arc<InMemoryJobStore>> {
        Client::new(InMemoryJobStore::arc(), ClientConfig::new("s3cret"))
    }

    fn fast() -> CallOptions {
        CallOptions::default()
            .with_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Claims the next job and finishes it the way a worker would.
    async fn finish_next(store: &InMemoryJobStore, outcome: Result<Value, &str>) -> JobId {
        loop {
            if let Some(job) = store.claim_next().await.unwrap() {
                match outcome {
                    Ok(value) => assert!(store.complete(job.id, value).await.unwrap()),
                    Err(message) => assert!(store.fail(job.id, message).await.unwrap()),
                }
                return job.id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn returns_the_result_a_worker_stores() {
        let client = client();
        let store = client.store().clone();
        let worker = tokio::spawn(async move { finish_next(&store, Ok(json!({"value": 42}))).await });

        let result = client.call_remote("answer", json!({}), fast()).await.unwrap();
        assert_eq!(result, json!({"value": 42}));
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn surfaces_the_stored_failure_message() {
        let client = client();
        let store = client.store().clone();
        tokio::spawn(async move { finish_next(&store, Err("model overloaded")).await });

        let err = client.call_remote("answer", json!({}), fast()).await.unwrap_err();
        assert!(matches!(&err, CallError::JobFailed { message, .. } if message == "model overloaded"));
        assert_eq!(err.to_string(), "model overloaded");
    }

    #[tokio::test]
    async fn times_out_without_touching_the_record() {
        let client = client();
        let options = CallOptions::default()
            .with_timeout(Duration::from_millis(100))
            .with_poll_interval(Duration::from_millis(50));

        let err = client.call_remote("slow", json!({}), options).await.unwrap_err();
        assert!(err.is_timeout());

        let job = client.store().find_by_id(err.job_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn unrepresentable_timeout_waits_without_a_deadline() {
        let client = client();
        let store = client.store().clone();
        tokio::spawn(async move { finish_next(&store, Ok(json!("eventually"))).await });

        let options = fast().with_timeout(Duration::MAX);
        let result = client.call_remote("answer", json!({}), options).await.unwrap();
        assert_eq!(result, json!("eventually"));
    }

    #[tokio::test]
    async fn rejects_paths_outside_the_root_before_touching_the_store() {
        let client = client();
        let err = client.call_remote("/etc/passwd", json!({}), fast()).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidHandlerPath(_)));
        assert!(client.store().is_empty());
    }

    #[tokio::test]
    async fn completed_jobs_are_served_from_cache() {
        let client = client();
        let store = client.store().clone();
        tokio::spawn(async move { finish_next(&store, Ok(json!("done"))).await });
        client.call_remote("answer", json!({"q": 1}), fast()).await.unwrap();
        assert_eq!(client.store().len(), 1);

        let submission = client.submit("answer", json!({"q": 1}), &fast()).await.unwrap();
        assert_eq!(submission, Submission::Cached(json!("done")));
        assert_eq!(client.store().len(), 1);
    }

    #[tokio::test]
    async fn in_flight_jobs_are_attached_to() {
        let client = client();
        let first = client.submit("answer", json!({"q": 1}), &fast()).await.unwrap();
        let second = client.submit("answer", json!({"q": 1}), &fast()).await.unwrap();

        let Submission::Created(job_id) = first else {
            panic!("expected a new job, got {first:?}");
        };
        assert_eq!(second, Submission::Attached(job_id));
        assert_eq!(client.store().len(), 1);
    }

    #[tokio::test]
    async fn skip_cache_always_creates() {
        let client = client();
        client.submit("answer", json!({}), &fast()).await.unwrap();
        let again = client.submit("answer", json!({}), &fast().skip_cache()).await.unwrap();
        assert!(matches!(again, Submission::Created(_)));
        assert_eq!(client.store().len(), 2);
    }

    #[tokio::test]
    async fn failed_jobs_are_not_reused() {
        let client = client();
        let store = client.store().clone();
        tokio::spawn(async move { finish_next(&store, Err("boom")).await });
        assert!(client.call_remote("answer", json!({}), fast()).await.is_err());

        let retry = client.submit("answer", json!({}), &fast()).await.unwrap();
        assert!(matches!(retry, Submission::Created(_)));
    }

    #[tokio::test]
    async fn typed_calls_encode_and_decode() {
        #[derive(Serialize)]
        struct Question {
            q: u32,
        }
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Answer {
            value: u32,
        }

        let client = client();
        let store = client.store().clone();
        tokio::spawn(async move { finish_next(&store, Ok(json!({"value": 42}))).await });

        let answer: Answer = client
            .call_remote_as("answer", &Question { q: 6 }, fast())
            .await
            .unwrap();
        assert_eq!(answer, Answer { value: 42 });
    }
}
