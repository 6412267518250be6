//! Controller worker pool.
//!
//! The worker:
//! - Feeds the queue from store change notifications and a periodic resync
//! - Runs one engine pass per dequeued key on the blocking pool
//! - Commits the plan, then requeues on request, on conflict or with
//!   backoff after a failure

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iset_instanceset::{run_pass, EngineOptions, LifecycleActions};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{ControllerError, ControllerResult};
use crate::queue::WorkQueue;
use crate::store::ObjectStore;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of keys reconciled concurrently.
    pub workers: usize,

    /// Interval between full resyncs.
    pub resync_interval: Duration,

    pub options: EngineOptions,
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.workers,
            resync_interval: config.resync_interval,
            options: config.engine_options(),
        }
    }
}

/// Drives instance sets from the store through the engine.
#[derive(Clone)]
pub struct ControllerWorker {
    store: Arc<dyn ObjectStore>,
    lifecycle: Arc<dyn LifecycleActions>,
    queue: Arc<WorkQueue>,
    config: WorkerConfig,
}

impl ControllerWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        lifecycle: Arc<dyn LifecycleActions>,
        queue: Arc<WorkQueue>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            lifecycle,
            queue,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run the worker pool until shutdown.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.config.workers,
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Starting instance-set controller worker"
        );

        let mut changes = self.store.subscribe();
        let mut handles = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.process_loop(id, shutdown).await;
            }));
        }

        // The first tick fires at once and enqueues everything stored.
        let mut resync = tokio::time::interval(self.config.resync_interval);

        loop {
            tokio::select! {
                _ = resync.tick() => {
                    self.resync().await;
                }
                change = changes.recv() => {
                    match change {
                        Ok(key) => self.queue.add(&key).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Change notifications lagged, resyncing");
                            self.resync().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Store change channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Controller worker shutting down");
                        break;
                    }
                }
            }
        }

        self.queue.shut_down().await;
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Reconcile worker panicked");
            }
        }
    }

    /// Enqueues every stored key.
    async fn resync(&self) {
        match self.store.list_keys().await {
            Ok(keys) => {
                debug!(count = keys.len(), "Resyncing instance sets");
                for key in keys {
                    self.queue.add(&key).await;
                }
            }
            Err(e) => error!(error = %e, "Failed to list instance sets"),
        }
    }

    async fn process_loop(&self, id: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = id, "Reconcile worker started");
        loop {
            tokio::select! {
                key = self.queue.get() => {
                    let Some(key) = key else {
                        break;
                    };
                    self.process(&key).await;
                    self.queue.done(&key).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(worker = id, "Reconcile worker stopped");
    }

    /// Reconciles one key and decides when it runs again.
    async fn process(&self, key: &str) {
        match self.reconcile_key(key).await {
            Ok(requeue_after) => {
                self.queue.forget(key).await;
                if let Some(delay) = requeue_after {
                    debug!(key, delay_ms = delay.as_millis() as u64, "Requeue requested");
                    self.queue.add_after(key, delay);
                }
            }
            Err(e) if e.is_conflict() => {
                debug!(key, error = %e, "Stale pass, requeueing");
                self.queue.add(key).await;
            }
            Err(e) if !e.is_retryable() => {
                warn!(key, error = %e, "Reconcile failed, waiting for the next change");
                self.queue.forget(key).await;
            }
            Err(e) => {
                if self.queue.add_rate_limited(key).await {
                    warn!(key, error = %e, "Reconcile failed, will retry");
                } else {
                    error!(key, error = %e, "Reconcile retries exhausted");
                }
            }
        }
    }

    /// Loads `key`, runs one pass and commits it. Returns when the engine
    /// asked to run again.
    #[instrument(skip(self))]
    pub async fn reconcile_key(&self, key: &str) -> ControllerResult<Option<Duration>> {
        let Some(snapshot) = self.store.load(key).await? else {
            debug!("Instance set gone");
            return Ok(None);
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let options = self.config.options;
        let now = Utc::now();
        let result = tokio::task::spawn_blocking(move || {
            run_pass(
                snapshot.set,
                snapshot.instances,
                options,
                lifecycle.as_ref(),
                now,
            )
        })
        .await
        .map_err(|e| ControllerError::Join(e.to_string()))?;

        match result {
            Ok(pass) => {
                self.store.commit(&pass.commit).await?;
                Ok(pass.requeue_after)
            }
            Err(err) => {
                self.store.publish_events(&err.events).await?;
                Err(err.into())
            }
        }
    }
}
