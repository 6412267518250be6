//! The in-memory working tree of one reconcile pass.
//!
//! A pass loads the root instance set and its live instances, lets every
//! stage mutate them here, and only then turns the accumulated changes
//! into a [`CommitPlan`]. Nothing reaches the store before that.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use iset_events::{Event, EventRecorder};
use iset_id::{compare_names, PassId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::model::{Instance, InstanceSet, InstanceSetStatus};
use crate::roles::RolePriorities;

/// What happens to one instance at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    Create,
    Update,
    Delete,
}

/// Everything a pass wants written, in one piece.
#[derive(Debug, Clone, Default)]
pub struct CommitPlan {
    /// `namespace/name` of the root.
    pub key: String,
    /// Root resource version observed when the tree was loaded.
    pub resource_version: String,
    pub status: InstanceSetStatus,
    pub creates: Vec<Instance>,
    pub updates: Vec<Instance>,
    pub deletes: Vec<String>,
    pub events: Vec<Event>,
}

impl CommitPlan {
    /// True when the plan writes no instance.
    pub fn is_status_only(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

#[derive(Debug)]
pub struct ObjectTree {
    root: InstanceSet,
    instances: BTreeMap<String, Instance>,
    changes: BTreeMap<String, Change>,
    recorder: EventRecorder,
    now: DateTime<Utc>,
    role_priorities: OnceLock<RolePriorities>,
}

impl ObjectTree {
    pub fn new(
        root: InstanceSet,
        instances: impl IntoIterator<Item = Instance>,
        pass_id: PassId,
        now: DateTime<Utc>,
    ) -> Self {
        let instances = instances
            .into_iter()
            .map(|i| (i.name().to_string(), i))
            .collect();
        Self {
            root,
            instances,
            changes: BTreeMap::new(),
            recorder: EventRecorder::new(pass_id),
            now,
            role_priorities: OnceLock::new(),
        }
    }

    pub fn root(&self) -> &InstanceSet {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut InstanceSet {
        &mut self.root
    }

    /// Pass clock; every stage sees the same instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Role index of the root, built on first use.
    pub fn role_priorities(&self) -> &RolePriorities {
        self.role_priorities
            .get_or_init(|| RolePriorities::new(&self.root.spec.roles))
    }

    /// Live instances sorted by name, numerically by ordinal.
    pub fn instances(&self) -> Vec<&Instance> {
        let mut instances: Vec<&Instance> = self.instances.values().collect();
        instances.sort_by(|a, b| compare_names(a.name(), b.name()));
        instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn add(&mut self, instance: Instance) -> Result<(), EngineError> {
        let name = instance.name().to_string();
        if self.instances.contains_key(&name) {
            return Err(EngineError::AlreadyExists(name));
        }
        let change = match self.changes.get(&name) {
            Some(Change::Delete) => Change::Update,
            _ => Change::Create,
        };
        debug!(instance = %name, ?change, "Instance added");
        self.changes.insert(name.clone(), change);
        self.instances.insert(name, instance);
        Ok(())
    }

    /// Replaces the instance of the same name.
    pub fn update(&mut self, instance: Instance) -> Result<(), EngineError> {
        let name = instance.name().to_string();
        let Some(slot) = self.instances.get_mut(&name) else {
            return Err(EngineError::NotFound(name));
        };
        *slot = instance;
        if self.changes.get(&name) != Some(&Change::Create) {
            self.changes.insert(name, Change::Update);
        }
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<Instance, EngineError> {
        let Some(instance) = self.instances.remove(name) else {
            return Err(EngineError::NotFound(name.to_string()));
        };
        debug!(instance = %name, "Instance deleted");
        match self.changes.get(name) {
            Some(Change::Create) => {
                self.changes.remove(name);
            }
            _ => {
                self.changes.insert(name.to_string(), Change::Delete);
            }
        }
        Ok(instance)
    }

    /// Pending change for `name`, if any.
    pub fn change(&self, name: &str) -> Option<Change> {
        self.changes.get(name).copied()
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut EventRecorder {
        &mut self.recorder
    }

    /// Events recorded so far, without consuming the tree.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.recorder.drain()
    }

    pub fn into_commit(mut self) -> CommitPlan {
        let mut plan = CommitPlan {
            key: self.root.metadata.key(),
            resource_version: self.root.metadata.resource_version.clone(),
            status: self.root.status.clone(),
            events: self.recorder.drain(),
            ..Default::default()
        };

        for (name, change) in self.changes {
            match change {
                Change::Delete => plan.deletes.push(name),
                Change::Create => {
                    if let Some(instance) = self.instances.remove(&name) {
                        plan.creates.push(instance);
                    }
                }
                Change::Update => {
                    if let Some(instance) = self.instances.remove(&name) {
                        plan.updates.push(instance);
                    }
                }
            }
        }

        plan.creates.sort_by(|a, b| compare_names(a.name(), b.name()));
        plan.updates.sort_by(|a, b| compare_names(a.name(), b.name()));
        plan.deletes.sort_by(|a, b| compare_names(a, b));
        plan
    }
}
