use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use offload_core::env;
use offload_store::{DEFAULT_SWEEP_INTERVAL, ExpirySweeper, PostgresJobStore};
use offload_worker::{HandlerRegistry, WorkerConfig, WorkerPool, builtin};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    offload_observability::init(config.verbose);

    let database_url = std::env::var(env::DATABASE_URL)
        .with_context(|| format!("{} must be set", env::DATABASE_URL))?;
    let store = Arc::new(
        PostgresJobStore::connect(&database_url)
            .await
            .context("failed to connect to job store")?,
    );

    let sweeper = ExpirySweeper::spawn(store.clone(), DEFAULT_SWEEP_INTERVAL);

    let mut registry = HandlerRegistry::new();
    builtin::register(&mut registry).context("failed to register built-in handlers")?;
    info!(handlers = ?registry.names(), "registered handlers");

    let handle = WorkerPool::new(store, registry, config).spawn();
    let trigger = handle.shutdown_trigger();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested; draining in-flight jobs");
        sweeper.shutdown().await;
        trigger.trigger();
    });

    handle.join().await?;
    info!("worker exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
