//! Reconciliation primitives for instance sets.
//!
//! This library provides the building blocks the instance-set engine and
//! its host controller share:
//!
//! - **Revisions**: deterministic hashes of desired templates, used to
//!   decide whether an instance is current.
//! - **Int-or-percent**: scaling of knobs such as `maxUnavailable`.
//! - **Retry tracking**: bounded error requeues per instance set.
//!
//! # Invariants
//!
//! - Revision hashes are independent of JSON key order
//! - Decisions are deterministic given the same inputs

mod intstr;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use intstr::IntOrPercent;

/// Reconciliation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// An int-or-percent value is neither an integer nor `"N%"`.
    #[error("invalid int or percent value: {0}")]
    InvalidIntOrPercent(String),

    /// A value could not be serialized for hashing.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        ReconcileError::Serialization(err.to_string())
    }
}

/// A template revision hash.
///
/// Short enough to be stored as a label value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(String);

impl Revision {
    /// Hash of `json` with object keys sorted.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let digest = Sha256::digest(sort_keys(json).to_string().as_bytes());
        Self(hex::encode(&digest[..8]))
    }

    /// Compute a revision from any serializable value.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, ReconcileError> {
        Ok(Self::from_json(&serde_json::to_value(value)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuilds `value` with the keys of every object in sorted order, so
/// its compact serialization is independent of insertion order.
fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        scalar => scalar.clone(),
    }
}

/// Split items into those at the desired revision and those behind it.
///
/// Items without a desired revision (the closure returns `None`) count as
/// outdated.
pub fn partition_by_revision<I, F>(items: I, is_current: F) -> (Vec<I::Item>, Vec<I::Item>)
where
    I: IntoIterator,
    F: Fn(&I::Item) -> Option<bool>,
{
    let mut current = Vec::new();
    let mut outdated = Vec::new();

    for item in items {
        if is_current(&item).unwrap_or(false) {
            current.push(item);
        } else {
            outdated.push(item);
        }
    }

    (current, outdated)
}

/// Failures of one key inside the current window.
#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    since: Instant,
}

impl Failures {
    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.since) > window
    }
}

/// Counts failed passes per key and paces their retries.
///
/// A key may fail `limit` times within `window`; the next failure exhausts
/// it. Counts start over once the window since the first failure elapses.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    limit: u32,
    window: Duration,
    by_key: BTreeMap<String, Failures>,
}

impl RetryTracker {
    pub fn new(max_retries: u32, window: Duration) -> Self {
        Self {
            limit: max_retries,
            window,
            by_key: BTreeMap::new(),
        }
    }

    /// Counts a failure of `key`. True once the key has failed more than
    /// the limit allows.
    pub fn record_failure(&mut self, key: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        let failures = self
            .by_key
            .entry(key.to_string())
            .and_modify(|f| {
                if f.expired(now, window) {
                    *f = Failures { count: 0, since: now };
                }
            })
            .or_insert(Failures { count: 0, since: now });

        failures.count += 1;
        failures.count > self.limit
    }

    pub fn is_exhausted(&self, key: &str) -> bool {
        self.by_key
            .get(key)
            .filter(|f| !f.expired(Instant::now(), self.window))
            .is_some_and(|f| f.count > self.limit)
    }

    /// Delay before the next retry: doubles per recorded failure, capped at
    /// the window.
    pub fn backoff(&self, key: &str) -> Duration {
        let count = self.by_key.get(key).map_or(0, |f| f.count);
        (DEFAULT_RETRY_BASE_DELAY * (1u32 << count.min(10))).min(self.window)
    }

    pub fn clear(&mut self, key: &str) {
        self.by_key.remove(key);
    }

    /// Drops keys whose window has elapsed.
    pub fn prune(&mut self) {
        let (now, window) = (Instant::now(), self.window);
        self.by_key.retain(|_, f| !f.expired(now, window));
    }
}

/// Default interval between full resyncs of every instance set.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default retry limit per instance set within the retry window.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Window in which failed passes count against the retry limit.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(600);

/// First backoff step after a failed pass.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
