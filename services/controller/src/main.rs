//! Instance-set controller
//!
//! Hosts the instance-set engine: keeps sets and their instances in a
//! store, queues a key whenever one of its objects changes, and runs
//! reconcile passes for queued keys on a pool of workers.
//!
//! ## Architecture
//!
//! - **Store**: in-memory objects, optionally seeded from a JSON file
//! - **Work queue**: one pending entry per key, one worker per key
//! - **Worker pool**: runs passes, commits plans and requeues

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use iset_controller::{Config, ControllerWorker, MemoryStore, WorkQueue, WorkerConfig};
use iset_instanceset::NoLifecycleActions;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long workers get to finish their current pass at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting instance-set controller");
    info!(
        workers = config.workers,
        resync_interval_secs = config.resync_interval.as_secs(),
        max_retries = config.max_retries,
        pod_vertical_scaling = config.pod_vertical_scaling,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.seed_file {
        let count = store.seed_from_file(path).await?;
        info!(path = %path.display(), count, "Seed instance sets loaded");
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let queue = WorkQueue::new(config.max_retries, config.retry_window);
    let worker = ControllerWorker::new(
        store,
        Arc::new(NoLifecycleActions),
        queue,
        WorkerConfig::from(&config),
    );
    let mut worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            worker.run(shutdown_rx).await;
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller worker panicked");
            }
            info!("Controller worker exited");
            return Ok(());
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    match tokio::time::timeout(SHUTDOWN_GRACE, worker_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Controller worker panicked"),
        Err(_) => warn!("Workers did not stop in time"),
    }

    info!("Controller shutdown complete");
    Ok(())
}
