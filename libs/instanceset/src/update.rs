//! Update stage: moves outdated instances to their desired template.
//!
//! Runs only once the live names match the desired names. Each pass
//! touches as many instances as `maxUnavailable` allows, in base role
//! order, and stops at the first instance that is not healthy enough to
//! be disturbed. With roles defined, only what the [`UpdatePlan`] returns
//! is a candidate.

use std::collections::{BTreeMap, BTreeSet};

use iset_events::EventReason;
use iset_reconcile::ReconcileError;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::lifecycle::{settle, ActionTarget, LIFECYCLE_RETRY_DELAY};
use crate::model::{
    ClaimObject, Condition, ConditionStatus, Instance, ManagedObject, Mergeable, PodUpdatePolicy,
    RollingUpdate, UpdateStrategyType, CONDITION_UPDATE_RESTRICTED, REASON_UPDATE_RESTRICTED,
};
use crate::pipeline::{CheckResult, EngineOptions, Outcome, PassContext, Reconciler};
use crate::plan::UpdatePlan;
use crate::template::build_instance;
use crate::tree::ObjectTree;

/// What it takes to bring an instance to its desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    NoOps,
    InPlace,
    Recreate,
}

/// Decides how `current` becomes `desired`.
///
/// A revision change always needs a recreate. A cpu/memory change is
/// applied in place only when the host supports vertical scaling.
pub fn update_policy(current: &Instance, desired: &Instance, options: &EngineOptions) -> UpdatePolicy {
    if current.revision() != desired.revision() {
        return UpdatePolicy::Recreate;
    }
    if current.pod.resources_differ(&desired.pod) {
        return if options.pod_vertical_scaling {
            UpdatePolicy::InPlace
        } else {
            UpdatePolicy::Recreate
        };
    }
    if current.pod.basic_fields_differ(&desired.pod)
        || children_differ(&current.claims, &desired.claims, claim_key)
        || children_differ(&current.assistants, &desired.assistants, assistant_key)
    {
        return UpdatePolicy::InPlace;
    }
    UpdatePolicy::NoOps
}

/// Rollout quota and `maxUnavailable` for `total` instances.
///
/// Both round down. The quota defaults to every instance;
/// `maxUnavailable` defaults to 1 and never drops below it.
pub fn parse_replicas_and_max_unavailable(
    rolling: Option<&RollingUpdate>,
    total: i32,
) -> Result<(i32, i32), ReconcileError> {
    let Some(rolling) = rolling else {
        return Ok((total, 1));
    };

    let replicas = match &rolling.replicas {
        Some(value) => value.scaled_value(total, false)?.clamp(0, total.max(0)),
        None => total,
    };
    let max_unavailable = match &rolling.max_unavailable {
        Some(value) => value.scaled_value(total, false)?,
        None => 1,
    };
    Ok((replicas, max_unavailable.max(1)))
}

fn claim_key(claim: &ClaimObject) -> (&str, &str) {
    ("PersistentVolumeClaim", claim.metadata.name.as_str())
}

fn assistant_key(object: &ManagedObject) -> (&str, &str) {
    (object.kind(), object.metadata().name.as_str())
}

fn children_differ<T, K>(current: &[T], desired: &[T], key: K) -> bool
where
    T: Mergeable,
    K: for<'x> Fn(&'x T) -> (&'x str, &'x str),
{
    desired.iter().any(|wanted| {
        current
            .iter()
            .find(|c| key(*c) == key(wanted))
            .map_or(true, |c| c.differs_from(wanted))
    })
}

fn merge_children<T, K>(current: &mut Vec<T>, desired: &[T], key: K)
where
    T: Mergeable + Clone,
    K: for<'x> Fn(&'x T) -> (&'x str, &'x str),
{
    for wanted in desired {
        match current.iter_mut().find(|c| key(c) == key(wanted)) {
            Some(existing) => existing.merge_from(wanted),
            None => current.push(wanted.clone()),
        }
    }
}

/// Applies the in-place part of `desired` to a copy of `current`.
fn merge_in_place(current: &Instance, desired: &Instance, options: &EngineOptions) -> Instance {
    let mut merged = current.clone();
    merged.pod.merge_basic_fields(&desired.pod);
    if options.pod_vertical_scaling {
        merged.pod.merge_resources(&desired.pod);
    }
    merge_children(&mut merged.claims, &desired.claims, claim_key);
    merge_children(&mut merged.assistants, &desired.assistants, assistant_key);
    merged
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateReconciler;

impl Reconciler for UpdateReconciler {
    fn name(&self) -> &'static str {
        "update"
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
        let options = ctx.options;

        let live: BTreeSet<&str> = tree.instances().into_iter().map(Instance::name).collect();
        let desired: BTreeSet<&str> = layout.names.iter().map(String::as_str).collect();
        if live != desired {
            debug!(
                live = live.len(),
                desired = desired.len(),
                "Live instances not aligned yet, deferring updates"
            );
            return Ok(Outcome::Continue);
        }

        let strategy = root.spec.instance_update_strategy.clone().unwrap_or_default();
        if strategy.strategy_type == UpdateStrategyType::OnDelete {
            tree.root_mut().status.remove_condition(CONDITION_UPDATE_RESTRICTED);
            return Ok(Outcome::Continue);
        }

        let total = layout.names.len() as i32;
        let (quota, max_unavailable) =
            parse_replicas_and_max_unavailable(strategy.rolling_update.as_ref(), total)?;
        let min_ready = root.spec.min_ready_seconds;
        let now = tree.now();

        let mut targets: BTreeMap<String, Instance> = BTreeMap::new();
        let mut policies: BTreeMap<String, UpdatePolicy> = BTreeMap::new();
        for instance in tree.instances() {
            let name = instance.name();
            let template = layout
                .templates
                .get(name)
                .ok_or_else(|| EngineError::TemplateNotFound(name.to_string()))?;
            let target = build_instance(&root, name, template, layout.revision_of(name).unwrap_or_default());
            policies.insert(name.to_string(), update_policy(instance, &target, &options));
            targets.insert(name.to_string(), target);
        }

        if let Some(pending) = tree
            .instances()
            .into_iter()
            .find(|i| i.is_pending() && !i.is_terminating() && policies[i.name()] != UpdatePolicy::NoOps)
            .map(|i| i.name().to_string())
        {
            info!(instance = %pending, "Recreating outdated pending instance");
            let removed = tree.delete(&pending)?;
            tree.recorder_mut().normal(
                removed.object_ref(),
                EventReason::InstanceRecreated,
                format!("recreating pending instance {pending}"),
                now,
            );
            return Ok(Outcome::Continue);
        }

        let unavailable = tree
            .instances()
            .iter()
            .filter(|i| !i.is_available(min_ready, now))
            .count() as i32;
        let mut budget = max_unavailable - unavailable;
        let mut updated = policies.values().filter(|p| **p == UpdatePolicy::NoOps).count() as i32;

        let (eligible, role_check) = if root.spec.has_roles() {
            let live_refs = tree.instances();
            let plan = UpdatePlan::build(&live_refs, tree.role_priorities(), root.spec.member_update_strategy());
            let picked: BTreeSet<String> = plan
                .execute(|i| policies[i.name()] != UpdatePolicy::NoOps, min_ready, now)
                .into_iter()
                .map(|i| i.name().to_string())
                .collect();
            (Some(picked), plan.role_check())
        } else {
            (None, false)
        };

        let mut ordered = tree.instances();
        tree.role_priorities().sort_instances(&mut ordered, false);
        let ordered: Vec<String> = ordered.iter().map(|i| i.name().to_string()).collect();

        let mut blocked = false;
        let mut retry = false;
        for name in &ordered {
            if budget <= 0 || updated >= quota {
                debug!(budget, updated, quota, "Update budget exhausted");
                break;
            }
            let Some(current) = tree.get(name).cloned() else {
                continue;
            };
            // Up-to-date instances stop the rollout too while unhealthy.
            if !current.is_ready()
                || !current.is_available(min_ready, now)
                || (role_check && !current.has_role())
            {
                debug!(instance = %name, "Instance not healthy enough to update, stopping");
                break;
            }
            let policy = policies[name];
            if policy == UpdatePolicy::NoOps {
                continue;
            }
            if eligible.as_ref().is_some_and(|picked| !picked.contains(name)) {
                continue;
            }

            match policy {
                UpdatePolicy::NoOps => {}
                UpdatePolicy::Recreate if root.spec.pod_update_policy == PodUpdatePolicy::StrictInPlace => {
                    warn!(instance = %name, "Recreate required but pod update policy is StrictInPlace");
                    let message = format!(
                        "instance {name} requires a recreate which podUpdatePolicy StrictInPlace forbids"
                    );
                    tree.root_mut().status.set_condition(Condition {
                        condition_type: CONDITION_UPDATE_RESTRICTED.to_string(),
                        status: ConditionStatus::True,
                        reason: REASON_UPDATE_RESTRICTED.to_string(),
                        message: message.clone(),
                        observed_generation: root.metadata.generation,
                        last_transition_time: now,
                    });
                    tree.recorder_mut()
                        .warning(current.object_ref(), EventReason::UpdateRestricted, message, now);
                    blocked = true;
                    break;
                }
                UpdatePolicy::InPlace => {
                    let merged = merge_in_place(&current, &targets[name], &options);
                    info!(instance = %name, "Updating instance in place");
                    tree.update(merged)?;
                    tree.recorder_mut().normal(
                        current.object_ref(),
                        EventReason::InstanceUpdatedInPlace,
                        format!("instance {name} updated in place"),
                        now,
                    );
                }
                UpdatePolicy::Recreate => {
                    if root.spec.has_roles() {
                        let target = ActionTarget::new(root.namespace(), root.name(), name.as_str());
                        let result = ctx.lifecycle.switchover(&target);
                        if !settle(tree, current.object_ref(), "switchover", result).proceed() {
                            retry = true;
                            break;
                        }
                    }
                    let revision = targets[name].revision();
                    info!(instance = %name, %revision, "Recreating instance");
                    tree.delete(name)?;
                    tree.recorder_mut().normal(
                        current.object_ref(),
                        EventReason::InstanceRecreated,
                        format!("instance {name} deleted to be recreated at the new revision"),
                        now,
                    );
                }
            }
            budget -= 1;
            updated += 1;
        }

        if !blocked {
            tree.root_mut().status.remove_condition(CONDITION_UPDATE_RESTRICTED);
        }
        if retry {
            return Ok(Outcome::RetryAfter(LIFECYCLE_RETRY_DELAY));
        }
        Ok(Outcome::Continue)
    }
}
