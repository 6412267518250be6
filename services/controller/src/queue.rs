//! Keyed work queue.
//!
//! A key is queued at most once, and at most one worker holds it at a
//! time. Adding a key while a worker holds it marks it dirty; it is queued
//! again when the worker calls [`WorkQueue::done`]. Failed keys are retried
//! with backoff through the embedded [`RetryTracker`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use iset_reconcile::RetryTracker;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys waiting to be handed out (queued, or re-added while held).
    dirty: BTreeSet<String>,
    /// Keys a worker currently holds.
    processing: BTreeSet<String>,
    shutting_down: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    retries: Mutex<RetryTracker>,
}

impl WorkQueue {
    pub fn new(max_retries: u32, retry_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            retries: Mutex::new(RetryTracker::new(max_retries, retry_window)),
        })
    }

    pub async fn add(&self, key: &str) {
        let mut state = self.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.to_string()) {
            return;
        }
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.ready.notify_one();
    }

    /// Adds `key` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key).await;
        });
    }

    /// Records a failure and schedules a retry after the backoff. Returns
    /// false, scheduling nothing, once the key's retries are exhausted.
    pub async fn add_rate_limited(self: &Arc<Self>, key: &str) -> bool {
        let mut retries = self.retries.lock().await;
        if retries.record_failure(key) {
            retries.clear(key);
            return false;
        }
        let delay = retries.backoff(key);
        drop(retries);

        debug!(key, delay_ms = delay.as_millis() as u64, "Retry scheduled");
        self.add_after(key, delay);
        true
    }

    /// Drops the key's failure history.
    pub async fn forget(&self, key: &str) {
        let mut retries = self.retries.lock().await;
        retries.clear(key);
        retries.prune();
    }

    /// Waits for the next key. `None` once the queue is shut down and
    /// drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let mut state = self.state.lock().await;
            if let Some(key) = state.queue.pop_front() {
                state.dirty.remove(&key);
                state.processing.insert(key.clone());
                let more = !state.queue.is_empty();
                drop(state);
                if more {
                    self.ready.notify_one();
                }
                return Some(key);
            }
            if state.shutting_down {
                return None;
            }
            drop(state);
            self.ready.notified().await;
        }
    }

    /// Releases a key handed out by [`get`](Self::get).
    pub async fn done(&self, key: &str) {
        let mut state = self.state.lock().await;
        if !state.processing.remove(key) {
            warn!(key, "Done called for a key that was not being processed");
            return;
        }
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Stops accepting keys and wakes idle workers.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.ready.notify_waiters();
    }

    /// Keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
