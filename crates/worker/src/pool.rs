//! Worker pool: the claim loop, per-job validation and graceful drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use offload_core::{JobId, JobRecord, env};
use offload_store::JobStore;

use crate::config::{ConfigError, WorkerConfig};
use crate::error::WorkerError;
use crate::registry::{Handler, HandlerRegistry};

const INVALID_SECRET: &str = "invalid or missing secret";
const INVALID_PATH: &str = "invalid handler path";
const HANDLER_NOT_FOUND: &str = "handler file not found";
const HANDLER_PANICKED: &str = "handler panicked";
const HANDLER_CANCELLED: &str = "handler cancelled";

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Jobs currently holding a concurrency slot
    pub active: usize,
}

#[derive(Debug, Default)]
struct Counters {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            jobs_claimed: self.claimed.load(Ordering::Relaxed),
            jobs_completed: self.completed.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Holds a concurrency slot for the lifetime of one job.
struct ActiveGuard {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl ActiveGuard {
    fn new(permit: OwnedSemaphorePermit, counters: Arc<Counters>) -> Self {
        counters.active.fetch_add(1, Ordering::Relaxed);
        Self {
            _permit: permit,
            counters,
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Cloneable trigger that asks a running pool to stop claiming and drain.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: ShutdownTrigger,
    join: JoinHandle<Result<(), WorkerError>>,
    counters: Arc<Counters>,
}

impl WorkerPoolHandle {
    /// Current pool statistics.
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Stop claiming new jobs. In-flight jobs keep running.
    pub fn request_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown.clone()
    }

    /// Wait for the pool to stop on its own (after a trigger fires elsewhere).
    pub async fn join(self) -> Result<(), WorkerError> {
        self.join
            .await
            .map_err(|e| WorkerError::Aborted(e.to_string()))?
    }

    /// Request graceful shutdown and wait for in-flight jobs to drain.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        self.request_shutdown();
        self.join().await
    }
}

struct Shared<S: ?Sized> {
    store: Arc<S>,
    registry: HandlerRegistry,
    config: WorkerConfig,
    counters: Arc<Counters>,
}

/// Background worker pool.
///
/// Claims jobs from a store and runs up to `max_concurrent` of them at once.
/// Jobs are validated before their handler is looked up; a job that fails validation
/// is marked failed without running anything.
pub struct WorkerPool<S: ?Sized> {
    shared: Arc<Shared<S>>,
}

impl<S: JobStore + ?Sized + 'static> WorkerPool<S> {
    pub fn new(store: Arc<S>, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                registry,
                config,
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// Spawn the pool on the current tokio runtime.
    pub fn spawn(self) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = self.shared.counters.clone();
        let join = tokio::spawn(self.run(shutdown_rx));

        WorkerPoolHandle {
            shutdown: ShutdownTrigger(Arc::new(shutdown_tx)),
            join,
            counters,
        }
    }

    /// Run the claim loop until `shutdown` turns true (or its sender is dropped),
    /// then wait for every in-flight job and close the store.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let shared = self.shared;
        let config = &shared.config;

        let total = u32::try_from(config.max_concurrent)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ConfigError::Invalid {
                name: env::MAX_CONCURRENT,
                reason: format!("{} is out of range", config.max_concurrent),
            })?;

        shared.store.ensure_indexes().await?;

        info!(
            worker = %config.name,
            max_concurrent = total,
            handlers = shared.registry.len(),
            root = %config.root,
            "worker pool started"
        );

        let permits = Arc::new(Semaphore::new(total as usize));

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match shared.store.claim_next().await {
                Ok(Some(job)) => {
                    shared.counters.claimed.fetch_add(1, Ordering::Relaxed);
                    let guard = ActiveGuard::new(permit, shared.counters.clone());
                    let span = info_span!("job", job_id = %job.id, handler = %job.handler_path);
                    let shared = shared.clone();
                    tokio::spawn(
                        async move {
                            let _guard = guard;
                            shared.process(job).await;
                        }
                        .instrument(span),
                    );
                }
                Ok(None) => {
                    drop(permit);
                    if pause(&mut shutdown, config.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(worker = %config.name, error = %e, "failed to claim job");
                    if pause(&mut shutdown, config.error_backoff).await {
                        break;
                    }
                }
            }
        }

        let active = shared.counters.active.load(Ordering::Relaxed);
        info!(worker = %config.name, active, "worker pool draining");

        // Every permit back means every spawned job has finished.
        if let Ok(all) = permits.acquire_many(total).await {
            drop(all);
        }

        shared.store.close().await;

        info!(worker = %config.name, "worker pool stopped");
        Ok(())
    }
}

impl<S: JobStore + ?Sized + 'static> Shared<S> {
    /// Reject jobs that must not run: wrong secret, path outside the root, unknown handler.
    fn validate(&self, job: &JobRecord) -> Result<Handler, &'static str> {
        if job.secret.is_empty() || job.secret != self.config.secret {
            return Err(INVALID_SECRET);
        }

        let path = self
            .config
            .root
            .resolve(&job.handler_path)
            .map_err(|_| INVALID_PATH)?;

        self.registry.get(&path).ok_or(HANDLER_NOT_FOUND)
    }

    async fn process(&self, job: JobRecord) {
        let job_id = job.id;

        let handler = match self.validate(&job) {
            Ok(handler) => handler,
            Err(reason) => {
                warn!(reason, "rejected job");
                self.record(job_id, Err(reason.to_string())).await;
                return;
            }
        };

        debug!("running handler");
        // Both the call and its future run inside the task so any panic surfaces as a JoinError.
        let args = job.args;
        let outcome = match tokio::spawn(async move { handler(args).await }).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!(error = ?e, "handler failed");
                Err(e.to_string())
            }
            Err(e) if e.is_panic() => {
                error!("handler panicked");
                Err(HANDLER_PANICKED.to_string())
            }
            Err(_) => Err(HANDLER_CANCELLED.to_string()),
        };

        self.record(job_id, outcome).await;
    }

    async fn record(&self, job_id: JobId, outcome: Result<Value, String>) {
        let succeeded = outcome.is_ok();
        let written = match outcome {
            Ok(result) => self.store.complete(job_id, result).await,
            Err(message) => self.store.fail(job_id, &message).await,
        };

        match written {
            Ok(true) => {
                let counter = if succeeded {
                    &self.counters.completed
                } else {
                    &self.counters.failed
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(succeeded, "job finished");
            }
            Ok(false) => {
                warn!("job no longer processing; outcome discarded");
            }
            Err(e) => {
                // The record stays in processing and is reclaimed once stale.
                error!(error = %e, "failed to record job outcome");
            }
        }
    }
}

/// Sleep for `duration` unless shutdown is requested first. Returns true to stop.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let stop = tokio::select! {
        changed = shutdown.changed() => changed.is_err(),
        _ = tokio::time::sleep(duration) => return false,
    };
    stop || *shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use offload_core::{HandlerRoot, JobStatus, NewJob};
    use offload_store::InMemoryJobStore;
    use serde_json::json;

    fn pool(store: Arc<InMemoryJobStore>) -> WorkerPool<InMemoryJobStore> {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |args| async move { Ok(args) }).unwrap();
        WorkerPool::new(store, registry, WorkerConfig::new("s3cret"))
    }

    fn record(handler_path: &str, secret: &str) -> JobRecord {
        let path = HandlerRoot::default().resolve("echo").unwrap();
        let mut new = NewJob::new(&path, json!({}), secret, Duration::from_secs(60));
        new.handler_path = handler_path.to_string();
        JobRecord::from_new(JobId::new(), new)
    }

    #[test]
    fn validation_checks_secret_then_path_then_handler() {
        let pool = pool(InMemoryJobStore::arc());
        let shared = &pool.shared;

        assert!(shared.validate(&record("echo", "s3cret")).is_ok());
        assert_eq!(shared.validate(&record("echo", "")).err(), Some(INVALID_SECRET));
        assert_eq!(shared.validate(&record("echo", "nope")).err(), Some(INVALID_SECRET));
        assert_eq!(
            shared.validate(&record("../../etc/passwd", "nope")).err(),
            Some(INVALID_SECRET)
        );
        assert_eq!(
            shared.validate(&record("../../etc/passwd", "s3cret")).err(),
            Some(INVALID_PATH)
        );
        assert_eq!(
            shared.validate(&record("missing", "s3cret")).err(),
            Some(HANDLER_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn pause_returns_early_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        let waiter = tokio::spawn(async move { pause(&mut rx, Duration::from_secs(30)).await });

        tx.send_replace(true);
        assert!(waiter.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn pause_times_out_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!pause(&mut rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn zero_concurrency_is_a_config_error() {
        let pool = WorkerPool::new(
            InMemoryJobStore::arc(),
            HandlerRegistry::new(),
            WorkerConfig::new("s3cret").with_max_concurrent(0),
        );
        let (_tx, rx) = watch::channel(false);
        let err = pool.run(rx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
    }

    #[tokio::test]
    async fn processes_a_job_and_counts_it() {
        let store = InMemoryJobStore::arc();
        let path = HandlerRoot::default().resolve("echo").unwrap();
        let id = store
            .create(NewJob::new(&path, json!({"v": 1}), "s3cret", Duration::from_secs(60)))
            .await
            .unwrap();

        let handle = pool(store.clone()).spawn();
        while handle.stats().jobs_completed == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"v": 1})));
        assert_eq!(handle.stats().jobs_claimed, 1);
        handle.shutdown().await.unwrap();
    }
}
