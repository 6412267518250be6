//! A simulated cluster: a store for one instance set plus a kubelet.
//!
//! Tests drive the engine pass by pass. After each pass the commit plan is
//! applied here, and [`Cluster::kubelet_tick`] starts pending instances so
//! the next pass sees them ready.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use iset_events::Event;
use iset_id::compare_names;
use iset_instanceset::lifecycle::LifecycleActions;
use iset_instanceset::model::{Instance, InstanceSet};
use iset_instanceset::{run_pass, CommitPlan, EngineOptions, PassError, PassResult};
use tracing::debug;

use crate::instance::{mark_ready, set_role};

/// Assigns a role to a freshly started instance.
pub type RoleProbe = fn(&str) -> Option<&'static str>;

#[derive(Debug)]
pub struct Cluster {
    set: InstanceSet,
    instances: BTreeMap<String, Instance>,
    now: DateTime<Utc>,
    options: EngineOptions,
    events: Vec<Event>,
    role_probe: Option<RoleProbe>,
}

impl Cluster {
    /// An empty cluster whose clock starts at a fixed instant.
    pub fn new(set: InstanceSet) -> Self {
        let now = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            set,
            instances: BTreeMap::new(),
            now,
            options: EngineOptions::default(),
            events: Vec::new(),
            role_probe: None,
        }
    }

    pub fn with_instances(mut self, instances: impl IntoIterator<Item = Instance>) -> Self {
        for instance in instances {
            self.instances.insert(instance.name().to_string(), instance);
        }
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_role_probe(mut self, probe: RoleProbe) -> Self {
        self.role_probe = Some(probe);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::seconds(1));
    }

    pub fn set(&self) -> &InstanceSet {
        &self.set
    }

    /// Edits the spec and bumps the generation, like an API server would.
    pub fn edit(&mut self, f: impl FnOnce(&mut InstanceSet)) {
        f(&mut self.set);
        self.set.metadata.generation += 1;
    }

    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    pub fn instance_mut(&mut self, name: &str) -> Option<&mut Instance> {
        self.instances.get_mut(name)
    }

    /// Live instances sorted by name.
    pub fn instances(&self) -> Vec<&Instance> {
        let mut all: Vec<&Instance> = self.instances.values().collect();
        all.sort_by(|a, b| compare_names(a.name(), b.name()));
        all
    }

    pub fn names(&self) -> Vec<String> {
        crate::instance::names(self.instances())
    }

    /// Every event published so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Runs one pass and, if it succeeds, applies its commit.
    pub fn reconcile(&mut self, lifecycle: &dyn LifecycleActions) -> Result<PassResult, PassError> {
        let instances: Vec<Instance> = self.instances.values().cloned().collect();
        let result = run_pass(self.set.clone(), instances, self.options, lifecycle, self.now)?;
        self.apply(&result.commit);
        Ok(result)
    }

    /// Writes a commit plan the way the store would.
    pub fn apply(&mut self, commit: &CommitPlan) {
        self.set.status = commit.status.clone();
        for name in &commit.deletes {
            self.instances.remove(name);
        }
        for instance in commit.creates.iter().chain(&commit.updates) {
            self.instances.insert(instance.name().to_string(), instance.clone());
        }
        self.events.extend(commit.events.iter().cloned());
        if let Ok(version) = self.set.metadata.resource_version.parse::<u64>() {
            self.set.metadata.resource_version = (version + 1).to_string();
        }
    }

    /// Starts every pending instance. Returns how many changed.
    pub fn kubelet_tick(&mut self) -> usize {
        let now = self.now;
        let probe = self.role_probe;
        let mut changed = 0;
        for instance in self.instances.values_mut() {
            if instance.is_terminating() || instance.status.ready || instance.is_failed() {
                continue;
            }
            mark_ready(instance, now);
            if let Some(role) = probe.and_then(|p| p(instance.name())) {
                set_role(instance, role);
            }
            changed += 1;
        }
        changed
    }

    /// Alternates passes and kubelet ticks until a pass writes no instance
    /// and the kubelet has nothing to start. Returns the passes run.
    pub fn converge(&mut self, lifecycle: &dyn LifecycleActions, max_passes: usize) -> Result<usize, PassError> {
        for pass in 1..=max_passes {
            let result = self.reconcile(lifecycle)?;
            let started = self.kubelet_tick();
            debug!(pass, started, "Simulated pass applied");
            if result.commit.is_status_only() && started == 0 && result.requeue_after.is_none() {
                return Ok(pass);
            }
            self.advance(result.requeue_after.unwrap_or(Duration::from_secs(1)));
        }
        Ok(max_passes)
    }
}
