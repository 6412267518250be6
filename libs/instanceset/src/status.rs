//! Status stage: rolls the live instances up into the set's status.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use iset_id::{compare_names, parse_parent_and_ordinal};
use tracing::debug;

use crate::error::EngineError;
use crate::model::{
    Condition, ConditionStatus, Instance, InstanceSet, InstanceTemplateStatus, MemberStatus,
    CONDITION_INSTANCE_AVAILABLE, CONDITION_INSTANCE_FAILURE, CONDITION_INSTANCE_READY,
    REASON_AVAILABLE, REASON_INSTANCE_FAILURE, REASON_NOT_AVAILABLE, REASON_NOT_READY, REASON_READY,
};
use crate::pipeline::{CheckResult, DesiredLayout, Outcome, PassContext, Reconciler};
use crate::roles::RolePriorities;
use crate::template::DEFAULT_TEMPLATE;
use crate::tree::ObjectTree;

/// Requeue delay while some ready instance waits out `minReadySeconds`
/// and no better estimate is known.
const AVAILABILITY_RECHECK: Duration = Duration::from_secs(1);

/// JSON array of `names`, sorted by parent then ordinal.
pub fn names_message(mut names: Vec<String>) -> Result<String, serde_json::Error> {
    names.sort_by(|a, b| compare_names(a, b));
    serde_json::to_string(&names)
}

fn condition(
    set: &InstanceSet,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) -> Condition {
    Condition {
        condition_type: condition_type.to_string(),
        status,
        reason: reason.to_string(),
        message,
        observed_generation: set.metadata.generation,
        last_transition_time: now,
    }
}

/// `InstanceReady`; lists the not-ready instances when false.
pub fn ready_condition(
    set: &InstanceSet,
    ready: bool,
    not_ready: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Condition, EngineError> {
    if ready {
        return Ok(condition(
            set,
            CONDITION_INSTANCE_READY,
            ConditionStatus::True,
            REASON_READY,
            String::new(),
            now,
        ));
    }
    Ok(condition(
        set,
        CONDITION_INSTANCE_READY,
        ConditionStatus::False,
        REASON_NOT_READY,
        names_message(not_ready)?,
        now,
    ))
}

/// `InstanceAvailable`; lists the ready but not yet available instances
/// when false.
pub fn available_condition(
    set: &InstanceSet,
    available: bool,
    not_available: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Condition, EngineError> {
    if available {
        return Ok(condition(
            set,
            CONDITION_INSTANCE_AVAILABLE,
            ConditionStatus::True,
            REASON_AVAILABLE,
            String::new(),
            now,
        ));
    }
    Ok(condition(
        set,
        CONDITION_INSTANCE_AVAILABLE,
        ConditionStatus::False,
        REASON_NOT_AVAILABLE,
        names_message(not_available)?,
        now,
    ))
}

/// `InstanceFailure`, or `None` when nothing failed.
pub fn failure_condition(
    set: &InstanceSet,
    instances: &[&Instance],
    now: DateTime<Utc>,
) -> Result<Option<Condition>, EngineError> {
    let failed: Vec<String> = instances
        .iter()
        .filter(|i| i.is_failed())
        .map(|i| i.name().to_string())
        .collect();
    if failed.is_empty() {
        return Ok(None);
    }
    Ok(Some(condition(
        set,
        CONDITION_INSTANCE_FAILURE,
        ConditionStatus::True,
        REASON_INSTANCE_FAILURE,
        names_message(failed)?,
        now,
    )))
}

/// Ready instances with a declared role, leader first.
pub fn members_status(instances: &[&Instance], roles: &RolePriorities) -> Vec<MemberStatus> {
    let mut members: Vec<MemberStatus> = instances
        .iter()
        .filter(|i| i.is_ready_with_role())
        .filter_map(|i| {
            let role = i.role()?;
            roles.info(&role)?;
            Some(MemberStatus {
                pod_name: i.name().to_string(),
                role,
            })
        })
        .collect();
    members.sort_by(|a, b| {
        roles
            .compare(Some(a.role.as_str()), &a.pod_name, Some(b.role.as_str()), &b.pod_name)
            .reverse()
    });
    members
}

#[derive(Debug, Default)]
struct Counters {
    replicas: i32,
    ready: i32,
    available: i32,
    current: i32,
    updated: i32,
    ordinals: Vec<i32>,
}

impl Counters {
    fn observe(
        &mut self,
        instance: &Instance,
        ordinal: Option<i32>,
        layout: &DesiredLayout,
        min_ready: i32,
        now: DateTime<Utc>,
    ) {
        self.replicas += 1;
        self.ordinals.extend(ordinal);
        if instance.is_ready() {
            self.ready += 1;
            if instance.is_available(min_ready, now) {
                self.available += 1;
            }
        }
        if !instance.is_terminating() {
            if layout.is_updated(instance) {
                self.updated += 1;
            } else {
                self.current += 1;
            }
        }
    }

    /// Once every instance is updated, they all count as current too.
    fn settle_current(&mut self, total: i32) {
        if self.replicas == total && self.updated == total {
            self.current = total;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReconciler;

impl Reconciler for StatusReconciler {
    fn name(&self) -> &'static str {
        "status"
    }

    fn pre_condition(&self, tree: &ObjectTree) -> CheckResult {
        if tree.root().metadata.is_deleting() {
            return CheckResult::Unsatisfied;
        }
        CheckResult::Satisfied
    }

    fn reconcile(&self, tree: &mut ObjectTree, ctx: &mut PassContext<'_>) -> Result<Outcome, EngineError> {
        let layout = ctx.layout()?;
        let root = tree.root().clone();
        let min_ready = root.spec.min_ready_seconds;
        let now = tree.now();
        let instances = tree.instances();

        let mut total = Counters::default();
        let mut per_template: BTreeMap<String, Counters> = BTreeMap::new();
        let mut not_ready = Vec::new();
        let mut not_available = Vec::new();
        let mut recheck: Option<Duration> = None;

        for instance in &instances {
            let (_, ordinal) = parse_parent_and_ordinal(instance.name());
            let template = instance.template_name();
            total.observe(instance, None, layout, min_ready, now);
            if template == DEFAULT_TEMPLATE {
                total.ordinals.extend(ordinal);
            }
            per_template
                .entry(template.to_string())
                .or_default()
                .observe(instance, ordinal, layout, min_ready, now);

            if !instance.is_ready() {
                not_ready.push(instance.name().to_string());
            } else if !instance.is_available(min_ready, now) {
                not_available.push(instance.name().to_string());
                if let Some(wait) = instance.until_available(min_ready, now) {
                    recheck = Some(recheck.map_or(wait, |r| r.min(wait)));
                }
            }
        }
        total.settle_current(root.spec.replicas);

        let templates_status: Vec<InstanceTemplateStatus> = per_template
            .into_iter()
            .filter(|(name, _)| name != DEFAULT_TEMPLATE)
            .map(|(name, mut counters)| {
                let desired = root
                    .spec
                    .instances
                    .iter()
                    .find(|t| t.name == name)
                    .map_or(0, |t| t.replicas());
                counters.settle_current(desired);
                counters.ordinals.sort_unstable();
                InstanceTemplateStatus {
                    name,
                    ordinals: counters.ordinals,
                    replicas: counters.replicas,
                    ready_replicas: counters.ready,
                    available_replicas: counters.available,
                    current_replicas: counters.current,
                    updated_replicas: counters.updated,
                }
            })
            .collect();

        let ready = ready_condition(&root, total.ready >= total.replicas, not_ready, now)?;
        let available = available_condition(&root, total.available >= total.replicas, not_available, now)?;
        let failure = failure_condition(&root, &instances, now)?;
        let members = if root.spec.has_roles() {
            members_status(&instances, tree.role_priorities())
        } else {
            Vec::new()
        };

        let status = &mut tree.root_mut().status;
        status.observed_generation = root.metadata.generation;
        status.replicas = total.replicas;
        status.ready_replicas = total.ready;
        status.available_replicas = total.available;
        status.current_replicas = total.current;
        status.updated_replicas = total.updated;
        total.ordinals.sort_unstable();
        status.ordinals = total.ordinals;
        status.templates_status = templates_status;
        status.members_status = members;

        if status.init_replicas == 0 {
            status.init_replicas = root.spec.replicas;
        }
        if !status.is_initially_provisioned() {
            status.ready_init_replicas = total.ready.min(status.init_replicas);
        }

        status.set_condition(ready);
        status.set_condition(available);
        match failure {
            Some(failure) => status.set_condition(failure),
            None => status.remove_condition(CONDITION_INSTANCE_FAILURE),
        }

        debug!(
            replicas = status.replicas,
            ready = status.ready_replicas,
            available = status.available_replicas,
            updated = status.updated_replicas,
            "Status aggregated"
        );

        if min_ready > 0 && total.available != total.ready {
            return Ok(Outcome::RetryAfter(recheck.unwrap_or(AVAILABILITY_RECHECK)));
        }
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstancePhase, ObjectMeta, PodObject, ReplicaRole};
    use iset_id::labels;

    fn instance(name: &str, role: Option<&str>, ready: bool) -> Instance {
        let mut metadata = ObjectMeta::named("default", name);
        if let Some(role) = role {
            metadata.labels.insert(labels::ROLE.to_string(), role.to_string());
        }
        Instance {
            pod: PodObject {
                metadata,
                ..Default::default()
            },
            status: crate::model::InstanceStatus {
                phase: InstancePhase::Running,
                ready,
                ready_since: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_names_message_sorted_numerically() {
        let message = names_message(vec!["pg-10".into(), "pg-2".into(), "pg-1".into()]).unwrap();
        assert_eq!(message, r#"["pg-1","pg-2","pg-10"]"#);
    }

    #[test]
    fn test_members_leader_first_then_names_ascending() {
        let roles = RolePriorities::new(&[
            ReplicaRole {
                name: "Leader".into(),
                update_priority: 2,
                participates_in_quorum: true,
            },
            ReplicaRole {
                name: "follower".into(),
                update_priority: 1,
                participates_in_quorum: true,
            },
        ]);
        let a = instance("pg-0", Some("follower"), true);
        let b = instance("pg-1", Some("leader"), true);
        let c = instance("pg-2", Some("follower"), true);
        let d = instance("pg-3", Some("witness"), true);
        let e = instance("pg-4", Some("follower"), false);

        let members = members_status(&[&a, &b, &c, &d, &e], &roles);
        let got: Vec<(&str, &str)> = members
            .iter()
            .map(|m| (m.pod_name.as_str(), m.role.as_str()))
            .collect();
        assert_eq!(got, vec![("pg-1", "leader"), ("pg-0", "follower"), ("pg-2", "follower")]);
    }

    #[test]
    fn test_failure_condition_only_when_failed() {
        let set = InstanceSet::default();
        let ok = instance("pg-0", None, true);
        let mut failed = instance("pg-1", None, false);
        failed.status.phase = InstancePhase::Failed;
        let now = Utc::now();

        assert!(failure_condition(&set, &[&ok], now).unwrap().is_none());
        let condition = failure_condition(&set, &[&ok, &failed], now).unwrap().unwrap();
        assert_eq!(condition.message, r#"["pg-1"]"#);
        assert_eq!(condition.reason, REASON_INSTANCE_FAILURE);
    }

    #[test]
    fn test_ready_condition_message() {
        let set = InstanceSet::default();
        let now = Utc::now();

        let ok = ready_condition(&set, true, Vec::new(), now).unwrap();
        assert_eq!(ok.status, ConditionStatus::True);
        assert!(ok.message.is_empty());

        let not_ok = ready_condition(&set, false, vec!["pg-1".into()], now).unwrap();
        assert_eq!(not_ok.status, ConditionStatus::False);
        assert_eq!(not_ok.reason, REASON_NOT_READY);
        assert_eq!(not_ok.message, r#"["pg-1"]"#);
    }
}
