//! Object store the controller loads trees from and commits plans to.
//!
//! One resource version covers a set together with its instances: spec
//! edits, instance status reports and commits all bump it. A commit
//! planned against an older version is rejected as a conflict.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iset_events::Event;
use iset_instanceset::model::{Instance, InstanceSet};
use iset_instanceset::CommitPlan;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Capacity of the change channel; slow subscribers see `Lagged` and
/// should resync.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Distinct events kept; the oldest is dropped past this.
const EVENT_LOG_CAPACITY: usize = 1024;

/// A set and its live instances as of one resource version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub set: InstanceSet,
    pub instances: Vec<Instance>,
}

/// Where instance sets and their instances live.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys of every stored instance set.
    async fn list_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Loads a set and its instances. `None` once the set is gone.
    async fn load(&self, key: &str) -> Result<Option<Snapshot>, StoreError>;

    /// Applies a commit plan atomically: all of it or none of it.
    async fn commit(&self, plan: &CommitPlan) -> Result<(), StoreError>;

    /// Publishes events recorded by a pass that committed nothing.
    async fn publish_events(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Keys of sets whose objects changed, as they change.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

#[derive(Debug, Default)]
struct StoredSet {
    set: InstanceSet,
    instances: BTreeMap<String, Instance>,
}

impl StoredSet {
    fn version(&self) -> u64 {
        self.set.metadata.resource_version.parse().unwrap_or(0)
    }

    fn bump_version(&mut self) {
        self.set.metadata.resource_version = (self.version() + 1).to_string();
    }
}

/// An event together with how often it repeated.
///
/// Events about the same object with the same reason and message are
/// merged: `event` is the first occurrence, `count` and `last_seen` track
/// the repeats.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: Event,
    pub count: u32,
    pub last_seen: DateTime<Utc>,
}

impl RecordedEvent {
    fn repeats(&self, event: &Event) -> bool {
        self.event.involved == event.involved
            && self.event.reason == event.reason
            && self.event.message == event.message
    }
}

#[derive(Debug, Default)]
struct EventLog {
    entries: VecDeque<RecordedEvent>,
}

impl EventLog {
    fn record(&mut self, event: &Event) {
        if let Some(pos) = self.entries.iter().position(|e| e.repeats(event)) {
            // Move the repeat to the back so eviction drops stale entries first.
            if let Some(mut entry) = self.entries.remove(pos) {
                entry.count = entry.count.saturating_add(1);
                entry.last_seen = entry.last_seen.max(event.occurred_at);
                self.entries.push_back(entry);
            }
            return;
        }

        if self.entries.len() == EVENT_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(RecordedEvent {
            event: event.clone(),
            count: 1,
            last_seen: event.occurred_at,
        });
    }

    fn extend<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.record(event);
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    sets: BTreeMap<String, StoredSet>,
    events: EventLog,
}

/// In-memory store.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    changes: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            changes,
        }
    }

    fn notify(&self, key: &str) {
        // No subscribers is fine; the resync picks the key up.
        let _ = self.changes.send(key.to_string());
    }

    /// Creates or updates a set from a user-supplied object. A changed spec
    /// bumps the generation; status is owned by the controller and kept.
    pub async fn apply(&self, mut set: InstanceSet) -> String {
        let key = set.metadata.key();
        let mut state = self.state.write().await;

        match state.sets.get_mut(&key) {
            Some(stored) => {
                if stored.set.spec != set.spec {
                    stored.set.metadata.generation += 1;
                    stored.set.spec = set.spec;
                }
                stored.set.metadata.labels = set.metadata.labels;
                stored.set.metadata.annotations = set.metadata.annotations;
                stored.bump_version();
                debug!(
                    key = %key,
                    generation = stored.set.metadata.generation,
                    "Instance set updated"
                );
            }
            None => {
                if set.metadata.uid.is_empty() {
                    set.metadata.uid = uuid::Uuid::new_v4().to_string();
                }
                set.metadata.generation = set.metadata.generation.max(1);
                set.metadata.resource_version = "1".to_string();
                set.metadata.creation_timestamp.get_or_insert_with(Utc::now);
                info!(key = %key, replicas = set.spec.replicas, "Instance set created");
                state.sets.insert(
                    key.clone(),
                    StoredSet {
                        set,
                        instances: BTreeMap::new(),
                    },
                );
            }
        }
        drop(state);

        self.notify(&key);
        key
    }

    /// Marks a set for deletion. The controller leaves deleting sets alone.
    pub async fn mark_deleting(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .sets
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        stored.set.metadata.deletion_timestamp.get_or_insert_with(Utc::now);
        stored.bump_version();
        drop(state);

        self.notify(key);
        Ok(())
    }

    /// Removes a set and every instance it owns.
    pub async fn remove(&self, key: &str) -> Option<InstanceSet> {
        let removed = self.state.write().await.sets.remove(key);
        if removed.is_some() {
            self.notify(key);
        }
        removed.map(|stored| stored.set)
    }

    /// Applies a change reported by whatever runs an instance (readiness,
    /// phase, role label).
    pub async fn update_instance(
        &self,
        key: &str,
        name: &str,
        f: impl FnOnce(&mut Instance) + Send,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .sets
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let instance = stored
            .instances
            .get_mut(name)
            .ok_or_else(|| StoreError::InstanceNotFound(name.to_string()))?;
        f(instance);
        stored.bump_version();
        drop(state);

        self.notify(key);
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<InstanceSet> {
        let state = self.state.read().await;
        state.sets.get(key).map(|stored| stored.set.clone())
    }

    /// Live instances of a set, sorted by name.
    pub async fn instances(&self, key: &str) -> Vec<Instance> {
        let state = self.state.read().await;
        state
            .sets
            .get(key)
            .map(|stored| stored.instances.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Published events, oldest first, with repeats merged.
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.state.read().await.events.entries.iter().cloned().collect()
    }

    /// Loads a JSON array of instance sets and applies each. Returns how
    /// many were applied.
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize, StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let sets: Vec<InstanceSet> = serde_json::from_str(&raw)?;
        let count = sets.len();
        for set in sets {
            self.apply(set).await;
        }
        Ok(count)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.read().await.sets.keys().cloned().collect())
    }

    async fn load(&self, key: &str) -> Result<Option<Snapshot>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sets.get(key).map(|stored| Snapshot {
            set: stored.set.clone(),
            instances: stored.instances.values().cloned().collect(),
        }))
    }

    async fn commit(&self, plan: &CommitPlan) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .sets
            .get_mut(&plan.key)
            .ok_or_else(|| StoreError::NotFound(plan.key.clone()))?;

        if stored.set.metadata.resource_version != plan.resource_version {
            warn!(
                key = %plan.key,
                expected = %plan.resource_version,
                actual = %stored.set.metadata.resource_version,
                "Commit rejected on stale resource version"
            );
            return Err(StoreError::Conflict {
                key: plan.key.clone(),
                expected: plan.resource_version.clone(),
                actual: stored.set.metadata.resource_version.clone(),
            });
        }

        // Check every write before applying any.
        if let Some(existing) = plan
            .creates
            .iter()
            .find(|i| stored.instances.contains_key(i.name()))
        {
            return Err(StoreError::AlreadyExists(existing.name().to_string()));
        }
        let missing = plan
            .updates
            .iter()
            .map(Instance::name)
            .chain(plan.deletes.iter().map(String::as_str))
            .find(|name| !stored.instances.contains_key(*name));
        if let Some(name) = missing {
            return Err(StoreError::InstanceNotFound(name.to_string()));
        }

        let writes_instances = !plan.is_status_only();
        let status_changed = stored.set.status != plan.status;

        if writes_instances || status_changed {
            stored.set.status = plan.status.clone();
            for name in &plan.deletes {
                stored.instances.remove(name);
            }
            for instance in plan.creates.iter().chain(&plan.updates) {
                stored
                    .instances
                    .insert(instance.name().to_string(), instance.clone());
            }
            stored.bump_version();
        }

        debug!(
            key = %plan.key,
            creates = plan.creates.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            events = plan.events.len(),
            status_changed,
            "Commit applied"
        );
        state.events.extend(&plan.events);
        drop(state);

        // A status write alone does not need another pass.
        if writes_instances {
            self.notify(&plan.key);
        }
        Ok(())
    }

    async fn publish_events(&self, events: &[Event]) -> Result<(), StoreError> {
        self.state.write().await.events.extend(events);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use iset_events::{EventReason, EventType, ObjectRef};
    use iset_testing::InstanceSetBuilder;

    use super::*;

    fn warning(name: &str, message: &str, at: DateTime<Utc>) -> Event {
        Event::builder()
            .involved(ObjectRef::new("InstanceSet", "default", name))
            .event_type(EventType::Warning)
            .reason(EventReason::InvalidSpec)
            .message(message)
            .occurred_at(at)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_repeated_events_are_merged() {
        let store = MemoryStore::new();
        let start = Utc::now();
        for i in 0..5 {
            let at = start + chrono::Duration::seconds(i);
            store.publish_events(&[warning("pg", "replicas overflow", at)]).await.unwrap();
        }
        store
            .publish_events(&[warning("pg", "duplicate template", start)])
            .await
            .unwrap();

        let events = store.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].count, 5);
        assert_eq!(events[0].event.occurred_at, start);
        assert_eq!(events[0].last_seen, start + chrono::Duration::seconds(4));
        assert_eq!(events[1].count, 1);
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for i in 0..EVENT_LOG_CAPACITY + 10 {
            store
                .publish_events(&[warning(&format!("pg-{i}"), "replicas overflow", now)])
                .await
                .unwrap();
        }

        let events = store.events().await;
        assert_eq!(events.len(), EVENT_LOG_CAPACITY);
        assert_eq!(events[0].event.involved.name, "pg-10");
    }

    #[tokio::test]
    async fn test_apply_bumps_generation_on_spec_change() {
        let store = MemoryStore::new();
        let key = store.apply(InstanceSetBuilder::new("pg").replicas(1).build()).await;
        let created = store.get(&key).await.unwrap();
        assert_eq!(created.metadata.generation, 1);
        assert!(!created.metadata.uid.is_empty());

        store.apply(InstanceSetBuilder::new("pg").replicas(1).build()).await;
        assert_eq!(store.get(&key).await.unwrap().metadata.generation, 1);

        store.apply(InstanceSetBuilder::new("pg").replicas(3).build()).await;
        let updated = store.get(&key).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);
        assert_eq!(updated.spec.replicas, 3);
        assert_eq!(updated.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn test_stale_commit_is_rejected() {
        let store = MemoryStore::new();
        let key = store.apply(InstanceSetBuilder::new("pg").replicas(1).build()).await;
        let snapshot = store.load(&key).await.unwrap().unwrap();

        store.apply(InstanceSetBuilder::new("pg").replicas(2).build()).await;

        let plan = CommitPlan {
            key: key.clone(),
            resource_version: snapshot.set.metadata.resource_version.clone(),
            status: snapshot.set.status.clone(),
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            events: Vec::new(),
        };
        let err = store.commit(&plan).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_status_only_commit_does_not_notify() {
        let store = MemoryStore::new();
        let key = store.apply(InstanceSetBuilder::new("pg").replicas(1).build()).await;
        let mut changes = store.subscribe();
        let snapshot = store.load(&key).await.unwrap().unwrap();

        let mut status = snapshot.set.status.clone();
        status.observed_generation = 1;
        let plan = CommitPlan {
            key: key.clone(),
            resource_version: snapshot.set.metadata.resource_version.clone(),
            status,
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            events: Vec::new(),
        };
        store.commit(&plan).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap().status.observed_generation, 1);
        assert!(matches!(
            changes.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
