//! Alignment stage: makes the live instance names match the desired ones.
//!
//! - `OrderedReady` creates one missing instance per pass, and only once
//!   its predecessor is available. It scales in one instance per pass.
//! - `Parallel` spends a concurrency budget on creations and, separately,
//!   on deletions.
//!
//! Deletion takes two passes. The first marks the instance `scaled_down`;
//! a later pass runs `member_leave` and removes it.

use std::collections::BTreeSet;

use iset_events::EventReason;
use iset_reconcile::{IntOrPercent, ReconcileError};
use tracing::{debug, info, instrument};

use crate::error::EngineError;
use crate::lifecycle::{settle, ActionStatus, ActionTarget, LifecycleActions, LIFECYCLE_RETRY_DELAY};
use crate::model::{Instance, InstanceSet, PodManagementPolicy};
use crate::pipeline::{CheckResult, DesiredLayout, Outcome, PassContext, Reconciler};
use crate::template::build_instance;
use crate::tree::ObjectTree;

/// Concurrency for `Parallel` management.
///
/// Defaults to every replica at once. A percentage below 100% of more
/// than one replica always leaves one slot unused. Never below 1.
pub fn parse_concurrency(value: Option<&IntOrPercent>, replicas: i32) -> Result<i32, ReconcileError> {
    let Some(value) = value else {
        return Ok(replicas.max(1));
    };

    let mut concurrency = value.scaled_value(replicas, true)?;
    if let Some(percent) = value.percent() {
        if percent? < 100 && replicas > 1 {
            concurrency = concurrency.min(replicas - 1);
        }
    }
    Ok(concurrency.max(1))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlignmentReconciler;

impl Reconciler for AlignmentReconciler {
    fn name(&self) -> &'static str {
        "alignment"
    }

    fn pre_condition(&self, tree: &ObjectTree) -> CheckResult {
        let root = tree.root();
        if root.metadata.is_deleting() || root.spec.paused {
            return CheckResult::Unsatisfied;
        }
        CheckResult::Satisfied
    }

    #[instrument(skip_all, fields(instance_set = %tree.root().name()))]
    fn reconcile(&self, tree: &mut ObjectTree, ctx: &mut PassContext<'_>) -> Result<Outcome, EngineError> {
        let root = tree.root().clone();
        let layout = ctx.layout()?;
        let desired: BTreeSet<&str> = layout.names.iter().map(String::as_str).collect();
        let mut pass = Alignment {
            root: &root,
            layout,
            lifecycle: ctx.lifecycle,
            retry: false,
        };

        pass.restore_scaled_down(tree, &desired)?;

        let concurrency = match root.spec.pod_management_policy {
            PodManagementPolicy::OrderedReady => None,
            PodManagementPolicy::Parallel => Some(parse_concurrency(
                root.spec.parallel_pod_management_concurrency.as_ref(),
                root.spec.replicas,
            )?),
        };

        match concurrency {
            None => pass.create_ordered(tree)?,
            Some(limit) => pass.create_parallel(tree, limit)?,
        }

        let mut condemned: Vec<&Instance> = tree
            .instances()
            .into_iter()
            .filter(|i| !desired.contains(i.name()))
            .collect();
        tree.role_priorities().sort_instances(&mut condemned, false);
        let condemned: Vec<String> = condemned.iter().map(|i| i.name().to_string()).collect();

        let delete_budget = concurrency.unwrap_or(1);
        for name in condemned.iter().take(delete_budget.max(1) as usize) {
            pass.scale_in(tree, name, concurrency.is_none())?;
        }

        pass.join_members(tree)?;

        if pass.retry {
            return Ok(Outcome::RetryAfter(LIFECYCLE_RETRY_DELAY));
        }
        Ok(Outcome::Continue)
    }
}

struct Alignment<'p> {
    root: &'p InstanceSet,
    layout: &'p DesiredLayout,
    lifecycle: &'p dyn LifecycleActions,
    retry: bool,
}

impl Alignment<'_> {
    fn target(&self, instance: &str) -> ActionTarget {
        ActionTarget::new(self.root.namespace(), self.root.name(), instance)
    }

    /// Clears the soft-delete marker of instances that are desired again.
    fn restore_scaled_down(&self, tree: &mut ObjectTree, desired: &BTreeSet<&str>) -> Result<(), EngineError> {
        let restored: Vec<Instance> = tree
            .instances()
            .into_iter()
            .filter(|i| i.scaled_down && desired.contains(i.name()))
            .cloned()
            .collect();
        for mut instance in restored {
            debug!(instance = %instance.name(), "Instance desired again, clearing scale-down marker");
            instance.scaled_down = false;
            tree.update(instance)?;
        }
        Ok(())
    }

    fn create(&self, tree: &mut ObjectTree, name: &str) -> Result<(), EngineError> {
        let template = self
            .layout
            .templates
            .get(name)
            .ok_or_else(|| EngineError::TemplateNotFound(name.to_string()))?;
        let revision = self.layout.revision_of(name).unwrap_or_default();

        let mut instance = build_instance(self.root, name, template, revision);
        instance.member_joined =
            !self.root.spec.has_roles() || !self.root.status.is_initially_provisioned();

        info!(instance = %name, template = %template.name, %revision, "Creating instance");
        tree.add(instance)
    }

    fn create_ordered(&self, tree: &mut ObjectTree) -> Result<(), EngineError> {
        let spec = &self.root.spec;
        let now = tree.now();
        for (idx, name) in self.layout.names.iter().enumerate() {
            if tree.contains(name) {
                continue;
            }
            let predecessor_available = idx == 0
                || tree.get(&self.layout.names[idx - 1]).map_or(true, |p| {
                    p.is_running_and_ready() && p.is_available(spec.min_ready_seconds, now)
                });
            if predecessor_available {
                self.create(tree, name)?;
            } else {
                debug!(instance = %name, "Waiting for predecessor to become available");
            }
            break;
        }
        Ok(())
    }

    fn create_parallel(&self, tree: &mut ObjectTree, concurrency: i32) -> Result<(), EngineError> {
        let now = tree.now();
        let min_ready = self.root.spec.min_ready_seconds;
        let unavailable = tree
            .instances()
            .iter()
            .filter(|i| !i.is_available(min_ready, now))
            .count() as i32;

        let mut budget = concurrency - unavailable;
        let missing: Vec<String> = self
            .layout
            .names
            .iter()
            .filter(|n| !tree.contains(n))
            .cloned()
            .collect();
        for name in missing {
            if budget <= 0 {
                debug!(budget, unavailable, "Creation budget exhausted");
                break;
            }
            self.create(tree, &name)?;
            budget -= 1;
        }
        Ok(())
    }

    /// One scale-in step for `name`: mark it, or remove a marked one.
    fn scale_in(&mut self, tree: &mut ObjectTree, name: &str, ordered: bool) -> Result<(), EngineError> {
        let Some(instance) = tree.get(name).cloned() else {
            return Ok(());
        };
        if instance.is_terminating() {
            return Ok(());
        }

        if !instance.scaled_down {
            if ordered && !instance.is_running_and_ready() {
                let now = tree.now();
                tree.recorder_mut().warning(
                    instance.object_ref(),
                    EventReason::ScaleInNotReady,
                    format!("scaling in instance {name} which is not running and ready"),
                    now,
                );
            }
            let mut marked = instance;
            marked.scaled_down = true;
            info!(instance = %name, "Marking instance scaled down");
            return tree.update(marked);
        }

        if self.root.spec.has_roles() {
            let result = self.lifecycle.member_leave(&self.target(name));
            let status = settle(tree, instance.object_ref(), "memberLeave", result);
            if !status.proceed() {
                self.retry = true;
                return Ok(());
            }
            if status == ActionStatus::Done {
                let now = tree.now();
                tree.recorder_mut().normal(
                    instance.object_ref(),
                    EventReason::MemberLeft,
                    format!("instance {name} left the replication group"),
                    now,
                );
            }
        }

        info!(instance = %name, "Deleting instance");
        tree.delete(name).map(|_| ())
    }

    /// Runs `member_join` for ready instances created after initial
    /// provisioning.
    fn join_members(&mut self, tree: &mut ObjectTree) -> Result<(), EngineError> {
        if !self.root.spec.has_roles() || !self.root.status.is_initially_provisioned() {
            return Ok(());
        }

        let joining: Vec<Instance> = tree
            .instances()
            .into_iter()
            .filter(|i| !i.member_joined && !i.scaled_down && i.is_ready())
            .cloned()
            .collect();

        for mut instance in joining {
            let result = self.lifecycle.member_join(&self.target(instance.name()));
            let status = settle(tree, instance.object_ref(), "memberJoin", result);
            if !status.proceed() {
                self.retry = true;
                continue;
            }
            if status == ActionStatus::Done {
                let now = tree.now();
                tree.recorder_mut().normal(
                    instance.object_ref(),
                    EventReason::MemberJoined,
                    format!("instance {} joined the replication group", instance.name()),
                    now,
                );
            }
            instance.member_joined = true;
            tree.update(instance)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, 5, 5)]
    #[case(None, 0, 1)]
    #[case(Some(IntOrPercent::Int(2)), 5, 2)]
    #[case(Some(IntOrPercent::Int(0)), 5, 1)]
    #[case(Some(IntOrPercent::from("50%")), 5, 3)]
    #[case(Some(IntOrPercent::from("99%")), 5, 4)]
    #[case(Some(IntOrPercent::from("100%")), 5, 5)]
    #[case(Some(IntOrPercent::from("50%")), 1, 1)]
    #[case(Some(IntOrPercent::from("1%")), 3, 1)]
    fn test_parse_concurrency(
        #[case] value: Option<IntOrPercent>,
        #[case] replicas: i32,
        #[case] expected: i32,
    ) {
        assert_eq!(parse_concurrency(value.as_ref(), replicas).unwrap(), expected);
    }

    #[test]
    fn test_parse_concurrency_rejects_garbage() {
        let value = IntOrPercent::Percent("lots".to_string());
        assert!(parse_concurrency(Some(&value), 3).is_err());
    }
}
