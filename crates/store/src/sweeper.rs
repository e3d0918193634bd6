//! Background expiry of job records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::JobStore;

/// How often the sweeper purges expired records by default.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically removes records whose `expires_at` has passed.
///
/// This is the store-side expiry mechanism: no other component deletes records.
/// Failures are logged and retried on the next tick; they never stop the sweeper.
#[derive(Debug)]
pub struct ExpirySweeper;

/// Handle to stop a running sweeper.
#[derive(Debug)]
pub struct ExpirySweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl ExpirySweeperHandle {
    /// Request shutdown and wait for the sweeper task to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

impl ExpirySweeper {
    /// Spawn a sweeper task on the current tokio runtime.
    pub fn spawn<S>(store: Arc<S>, interval: Duration) -> ExpirySweeperHandle
    where
        S: JobStore + ?Sized + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match store.purge_expired().await {
                            Ok(0) => {}
                            Ok(removed) => debug!(removed, "purged expired jobs"),
                            Err(e) => warn!(error = %e, "expiry sweep failed"),
                        }
                    }
                }
            }

            info!("expiry sweeper stopped");
        });

        ExpirySweeperHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryJobStore;
    use chrono::Utc;
    use offload_core::{HandlerRoot, NewJob};

    #[tokio::test]
    async fn sweeper_purges_expired_records() {
        let store = InMemoryJobStore::arc();
        let path = HandlerRoot::default().resolve("echo").unwrap();

        let mut expired = NewJob::new(&path, serde_json::json!({}), "s", Duration::from_secs(60));
        expired.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.create(expired).await.unwrap();
        store
            .create(NewJob::new(&path, serde_json::json!({}), "s", Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        let handle = ExpirySweeper::spawn(store.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        assert_eq!(store.len(), 1);
    }
}
