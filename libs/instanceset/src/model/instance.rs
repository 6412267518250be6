//! The managed unit: a pod plus its claims and assistant objects.

use chrono::{DateTime, Duration, Utc};
use iset_id::labels;
use serde::{Deserialize, Serialize};

use super::{ClaimObject, ManagedObject, PodObject};

pub const INSTANCE_KIND: &str = "Instance";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstancePhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Observed state, reported by whatever runs the pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default)]
    pub phase: InstancePhase,
    #[serde(default)]
    pub ready: bool,
    /// When the instance last became ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub pod: PodObject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<ClaimObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assistants: Vec<ManagedObject>,
    #[serde(default)]
    pub status: InstanceStatus,
    /// Soft-delete marker; set one pass before the hard delete.
    #[serde(default)]
    pub scaled_down: bool,
    /// Set once the instance is a member of the replication group.
    #[serde(default)]
    pub member_joined: bool,
}

impl Instance {
    pub fn name(&self) -> &str {
        &self.pod.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.pod.metadata.namespace
    }

    pub fn object_ref(&self) -> iset_events::ObjectRef {
        iset_events::ObjectRef::new(INSTANCE_KIND, self.namespace(), self.name())
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.pod.metadata.labels.get(key).map(String::as_str)
    }

    /// Template that produced this instance; empty for the default one.
    pub fn template_name(&self) -> &str {
        self.label(labels::TEMPLATE_NAME).unwrap_or_default()
    }

    pub fn revision(&self) -> &str {
        self.label(labels::REVISION_HASH).unwrap_or_default()
    }

    /// Role reported by probing, lower-cased; `None` until probed.
    pub fn role(&self) -> Option<String> {
        self.label(labels::ROLE)
            .filter(|r| !r.is_empty())
            .map(str::to_lowercase)
    }

    pub fn has_role(&self) -> bool {
        self.role().is_some()
    }

    pub fn is_terminating(&self) -> bool {
        self.pod.metadata.is_deleting()
    }

    pub fn is_ready(&self) -> bool {
        self.status.ready && !self.is_terminating()
    }

    pub fn is_running_and_ready(&self) -> bool {
        self.status.phase == InstancePhase::Running && self.is_ready()
    }

    pub fn is_pending(&self) -> bool {
        self.status.phase == InstancePhase::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.status.phase == InstancePhase::Failed
    }

    /// Ready for at least `min_ready_seconds` as of `now`.
    pub fn is_available(&self, min_ready_seconds: i32, now: DateTime<Utc>) -> bool {
        if !self.is_ready() {
            return false;
        }
        if min_ready_seconds <= 0 {
            return true;
        }
        self.status
            .ready_since
            .is_some_and(|since| since + Duration::seconds(i64::from(min_ready_seconds)) <= now)
    }

    /// Time left until a ready instance becomes available.
    pub fn until_available(
        &self,
        min_ready_seconds: i32,
        now: DateTime<Utc>,
    ) -> Option<std::time::Duration> {
        if !self.is_ready() || self.is_available(min_ready_seconds, now) {
            return None;
        }
        let since = self.status.ready_since.unwrap_or(now);
        (since + Duration::seconds(i64::from(min_ready_seconds)) - now)
            .to_std()
            .ok()
    }

    /// Ready and carrying a role label.
    pub fn is_ready_with_role(&self) -> bool {
        self.is_ready() && self.has_role()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectMeta;

    fn instance(ready_since: Option<DateTime<Utc>>) -> Instance {
        let mut pod = PodObject {
            metadata: ObjectMeta::named("default", "mysql-0"),
            ..Default::default()
        };
        pod.metadata
            .labels
            .insert(labels::ROLE.to_string(), "Leader".to_string());
        Instance {
            pod,
            status: InstanceStatus {
                phase: InstancePhase::Running,
                ready: ready_since.is_some(),
                ready_since,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_role_is_lower_cased() {
        assert_eq!(instance(None).role().as_deref(), Some("leader"));
    }

    #[test]
    fn test_availability_respects_min_ready_seconds() {
        let now = Utc::now();
        let inst = instance(Some(now - Duration::seconds(5)));

        assert!(inst.is_available(0, now));
        assert!(inst.is_available(5, now));
        assert!(!inst.is_available(10, now));
        assert_eq!(
            inst.until_available(10, now),
            Some(std::time::Duration::from_secs(5))
        );
    }

    #[test]
    fn test_terminating_is_never_ready() {
        let now = Utc::now();
        let mut inst = instance(Some(now));
        inst.pod.metadata.deletion_timestamp = Some(now);

        assert!(!inst.is_ready());
        assert!(!inst.is_available(0, now));
    }
}
