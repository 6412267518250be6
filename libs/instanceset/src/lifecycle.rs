//! Lifecycle actions run against a live instance.
//!
//! The engine calls these while planning a pass; a host decides how they
//! reach the workload (an agent sidecar, an RPC, nothing at all).

use std::fmt;
use std::time::Duration;

use iset_events::{EventReason, ObjectRef};
use thiserror::Error;
use tracing::warn;

use crate::tree::ObjectTree;

/// Requeue delay after a failed lifecycle action.
pub const LIFECYCLE_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The workload does not define this action. Callers treat it as
    /// success.
    #[error("lifecycle action {0} is not defined")]
    NotDefined(&'static str),

    #[error("lifecycle action failed: {0}")]
    Failed(String),
}

impl LifecycleError {
    pub fn is_not_defined(&self) -> bool {
        matches!(self, LifecycleError::NotDefined(_))
    }
}

/// The instance an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionTarget {
    pub namespace: String,
    pub instance_set: String,
    pub instance: String,
}

impl ActionTarget {
    pub fn new(
        namespace: impl Into<String>,
        instance_set: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            instance_set: instance_set.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.instance_set, self.instance)
    }
}

/// Membership and leadership actions.
pub trait LifecycleActions: Send + Sync {
    /// Moves leadership away from `target` before it is recreated.
    fn switchover(&self, target: &ActionTarget) -> Result<(), LifecycleError>;

    /// Adds `target` to the replication group.
    fn member_join(&self, target: &ActionTarget) -> Result<(), LifecycleError>;

    /// Removes `target` from the replication group before it is deleted.
    fn member_leave(&self, target: &ActionTarget) -> Result<(), LifecycleError>;
}

/// A workload that defines no lifecycle actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLifecycleActions;

impl LifecycleActions for NoLifecycleActions {
    fn switchover(&self, _target: &ActionTarget) -> Result<(), LifecycleError> {
        Err(LifecycleError::NotDefined("switchover"))
    }

    fn member_join(&self, _target: &ActionTarget) -> Result<(), LifecycleError> {
        Err(LifecycleError::NotDefined("memberJoin"))
    }

    fn member_leave(&self, _target: &ActionTarget) -> Result<(), LifecycleError> {
        Err(LifecycleError::NotDefined("memberLeave"))
    }
}

/// Folds a `NotDefined` result into success.
pub fn ignore_not_defined(result: Result<(), LifecycleError>) -> Result<(), LifecycleError> {
    match result {
        Err(err) if err.is_not_defined() => Ok(()),
        other => other,
    }
}

/// How an action call ended, once failures have been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActionStatus {
    Done,
    NotDefined,
    Failed,
}

impl ActionStatus {
    /// The step guarded by the action may go ahead.
    pub(crate) fn proceed(self) -> bool {
        !matches!(self, ActionStatus::Failed)
    }
}

/// Records a `LifecycleActionFailed` warning for a failed call.
pub(crate) fn settle(
    tree: &mut ObjectTree,
    involved: ObjectRef,
    action: &str,
    result: Result<(), LifecycleError>,
) -> ActionStatus {
    match result {
        Ok(()) => ActionStatus::Done,
        Err(err) if err.is_not_defined() => ActionStatus::NotDefined,
        Err(err) => {
            warn!(object = %involved, action, error = %err, "Lifecycle action failed");
            let now = tree.now();
            tree.recorder_mut().warning(
                involved,
                EventReason::LifecycleActionFailed,
                format!("{action} failed: {err}"),
                now,
            );
            ActionStatus::Failed
        }
    }
}
