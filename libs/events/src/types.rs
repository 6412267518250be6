//! Event type and reason definitions.

use serde::{Deserialize, Serialize};

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventType {
    #[default]
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// Machine-readable reason attached to every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventReason {
    /// The instance set spec failed validation.
    InvalidSpec,
    /// Some template could not get all the ordinals it asked for.
    OrdinalsNotEnough,
    /// An instance is removed while it is not running and ready.
    ScaleInNotReady,
    /// An update is blocked by the pod update policy.
    UpdateRestricted,
    /// An outdated instance is deleted so it can be recreated.
    InstanceRecreated,
    /// An outdated instance is updated in place.
    InstanceUpdatedInPlace,
    /// A switchover, member-join or member-leave action failed.
    LifecycleActionFailed,
    /// A new member joined the replication group.
    MemberJoined,
    /// A member left the replication group before deletion.
    MemberLeft,
}

impl EventReason {
    /// Returns the reason as it appears on published events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventReason::InvalidSpec => "InvalidSpec",
            EventReason::OrdinalsNotEnough => "OrdinalsNotEnough",
            EventReason::ScaleInNotReady => "ScaleInNotReady",
            EventReason::UpdateRestricted => "InstanceUpdateRestricted",
            EventReason::InstanceRecreated => "InstanceRecreated",
            EventReason::InstanceUpdatedInPlace => "InstanceUpdatedInPlace",
            EventReason::LifecycleActionFailed => "LifecycleActionFailed",
            EventReason::MemberJoined => "MemberJoined",
            EventReason::MemberLeft => "MemberLeft",
        }
    }
}

impl std::fmt::Display for EventReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        assert_eq!(EventReason::UpdateRestricted.to_string(), "InstanceUpdateRestricted");
        assert_eq!(EventReason::OrdinalsNotEnough.as_str(), "OrdinalsNotEnough");
    }

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(serde_json::to_string(&EventType::Warning).unwrap(), "\"Warning\"");
    }

    #[test]
    fn test_object_ref_display() {
        let obj = ObjectRef::new("InstanceSet", "default", "mysql");
        assert_eq!(obj.to_string(), "InstanceSet/default/mysql");
    }
}
