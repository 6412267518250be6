//! Observed status of an instance set, and condition helpers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CONDITION_INSTANCE_READY: &str = "InstanceReady";
pub const CONDITION_INSTANCE_AVAILABLE: &str = "InstanceAvailable";
pub const CONDITION_INSTANCE_FAILURE: &str = "InstanceFailure";
pub const CONDITION_UPDATE_RESTRICTED: &str = "InstanceUpdateRestricted";

pub const REASON_READY: &str = "Ready";
pub const REASON_NOT_READY: &str = "NotReady";
pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_NOT_AVAILABLE: &str = "NotAvailable";
pub const REASON_INSTANCE_FAILURE: &str = "InstanceFailure";
pub const REASON_UPDATE_RESTRICTED: &str = "InstanceUpdateRestricted";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub current_replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,

    /// Replica count at first provisioning.
    #[serde(default)]
    pub init_replicas: i32,
    /// Instances of the first provisioning that have become ready.
    #[serde(default)]
    pub ready_init_replicas: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_revision: String,
    /// Desired revision per instance name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub update_revisions: BTreeMap<String, String>,
    /// Observed revision per live instance name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub current_revisions: BTreeMap<String, String>,

    /// Ordinals held by the default template.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordinals: Vec<i32>,
    /// Per named template, sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates_status: Vec<InstanceTemplateStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_status: Vec<MemberStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl InstanceSetStatus {
    /// Initial provisioning has completed at least once.
    pub fn is_initially_provisioned(&self) -> bool {
        self.init_replicas > 0 && self.ready_init_replicas >= self.init_replicas
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Sets a condition, moving `lastTransitionTime` only when the status
    /// flips.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    pub fn remove_condition(&mut self, condition_type: &str) {
        self.conditions
            .retain(|c| c.condition_type != condition_type);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplateStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordinals: Vec<i32>,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub current_replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    pub pod_name: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn condition(status: ConditionStatus, at: DateTime<Utc>) -> Condition {
        Condition {
            condition_type: CONDITION_INSTANCE_READY.to_string(),
            status,
            reason: REASON_READY.to_string(),
            message: String::new(),
            observed_generation: 1,
            last_transition_time: at,
        }
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_unchanged() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);
        let mut status = InstanceSetStatus::default();

        status.set_condition(condition(ConditionStatus::True, t0));
        status.set_condition(condition(ConditionStatus::True, t1));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, t0);

        status.set_condition(condition(ConditionStatus::False, t1));
        assert_eq!(status.conditions[0].last_transition_time, t1);
    }

    #[test]
    fn test_remove_condition() {
        let mut status = InstanceSetStatus::default();
        status.set_condition(condition(ConditionStatus::True, Utc::now()));
        status.remove_condition(CONDITION_INSTANCE_READY);
        assert!(status.condition(CONDITION_INSTANCE_READY).is_none());
    }

    #[test]
    fn test_initially_provisioned() {
        let mut status = InstanceSetStatus::default();
        assert!(!status.is_initially_provisioned());
        status.init_replicas = 3;
        status.ready_init_replicas = 3;
        assert!(status.is_initially_provisioned());
    }
}
