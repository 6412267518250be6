//! Lifecycle actions that remember every call.

use std::collections::BTreeSet;
use std::sync::Mutex;

use iset_instanceset::lifecycle::{ActionTarget, LifecycleActions, LifecycleError};

/// One recorded call: action name and instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub action: &'static str,
    pub instance: String,
}

/// Records calls and fails the instances listed in `failing`.
#[derive(Debug, Default)]
pub struct RecordingLifecycle {
    calls: Mutex<Vec<RecordedCall>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call against `instance` fails until [`Self::recover`].
    pub fn fail(&self, instance: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(instance.to_string());
        }
    }

    pub fn recover(&self, instance: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(instance);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Instances `action` was called for, in call order.
    pub fn calls_to(&self, action: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == action)
            .map(|c| c.instance)
            .collect()
    }

    fn record(&self, action: &'static str, target: &ActionTarget) -> Result<(), LifecycleError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                action,
                instance: target.instance.clone(),
            });
        }
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&target.instance))
            .unwrap_or(false);
        if failing {
            return Err(LifecycleError::Failed(format!("{action} refused for {target}")));
        }
        Ok(())
    }
}

impl LifecycleActions for RecordingLifecycle {
    fn switchover(&self, target: &ActionTarget) -> Result<(), LifecycleError> {
        self.record("switchover", target)
    }

    fn member_join(&self, target: &ActionTarget) -> Result<(), LifecycleError> {
        self.record("memberJoin", target)
    }

    fn member_leave(&self, target: &ActionTarget) -> Result<(), LifecycleError> {
        self.record("memberLeave", target)
    }
}
