//! The InstanceSet resource and its declarative spec.

use std::collections::BTreeMap;

use iset_reconcile::IntOrPercent;
use serde::{Deserialize, Serialize};

use super::{
    EnvVar, InstanceSetStatus, ManagedObject, ObjectMeta, PodTemplate, ResourceRequirements,
    SchedulingPolicy, Volume, VolumeClaimTemplate, VolumeMount,
};

/// Kind string used on events and object references.
pub const INSTANCE_SET_KIND: &str = "InstanceSet";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSet {
    pub metadata: ObjectMeta,
    pub spec: InstanceSetSpec,
    #[serde(default)]
    pub status: InstanceSetStatus,
}

impl InstanceSet {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn object_ref(&self) -> iset_events::ObjectRef {
        iset_events::ObjectRef::new(INSTANCE_SET_KIND, self.namespace(), self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetSpec {
    /// Desired total number of instances.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Seconds an instance must stay ready before it counts as available.
    #[serde(default)]
    pub min_ready_seconds: i32,

    /// Labels every owned instance carries.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Base pod template; instance templates override parts of it.
    #[serde(default)]
    pub template: PodTemplate,

    /// Named overrides, each owning a share of the replicas.
    #[serde(default)]
    pub instances: Vec<InstanceTemplate>,

    /// Ordinal constraint of the default (unnamed) template.
    #[serde(default)]
    pub default_template_ordinals: Ordinals,

    /// Draw ordinals from one set-wide pool instead of one per template.
    #[serde(default)]
    pub flat_instance_ordinal: bool,

    /// Names excluded from allocation.
    #[serde(default)]
    pub offline_instances: Vec<String>,

    #[serde(default)]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,

    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_pod_management_concurrency: Option<IntOrPercent>,

    #[serde(default)]
    pub pod_update_policy: PodUpdatePolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_update_strategy: Option<InstanceUpdateStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_update_strategy: Option<MemberUpdateStrategy>,

    #[serde(default)]
    pub roles: Vec<ReplicaRole>,

    /// Objects cloned next to every instance (config maps, RBAC, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assistant_objects: Vec<ManagedObject>,

    /// Whether instances carry their own copies of `assistant_objects`.
    #[serde(default)]
    pub clone_assistant_objects: bool,

    #[serde(default)]
    pub paused: bool,
}

fn default_replicas() -> i32 {
    1
}

impl Default for InstanceSetSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            min_ready_seconds: 0,
            selector: BTreeMap::new(),
            template: PodTemplate::default(),
            instances: Vec::new(),
            default_template_ordinals: Ordinals::default(),
            flat_instance_ordinal: false,
            offline_instances: Vec::new(),
            volume_claim_templates: Vec::new(),
            pod_management_policy: PodManagementPolicy::default(),
            parallel_pod_management_concurrency: None,
            pod_update_policy: PodUpdatePolicy::default(),
            instance_update_strategy: None,
            member_update_strategy: None,
            roles: Vec::new(),
            assistant_objects: Vec::new(),
            clone_assistant_objects: false,
            paused: false,
        }
    }
}

impl InstanceSetSpec {
    pub fn member_update_strategy(&self) -> MemberUpdateStrategy {
        self.member_update_strategy.unwrap_or_default()
    }

    pub fn has_roles(&self) -> bool {
        !self.roles.is_empty()
    }
}

/// A named override bundle applied to a subset of instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    pub name: String,

    /// Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub ordinals: Ordinals,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Image of the first container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// cpu/memory of the first container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Env of the first container, merged by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<VolumeClaimTemplate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
}

impl InstanceTemplate {
    pub fn replicas(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }
}

/// An ordinal constraint: discrete values plus inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ordinals {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<OrdinalRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discrete: Vec<i32>,
}

impl Ordinals {
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.discrete.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinalRange {
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaRole {
    pub name: String,
    /// Higher values are updated later; the highest is the leader.
    #[serde(default)]
    pub update_priority: i32,
    #[serde(default)]
    pub participates_in_quorum: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodManagementPolicy {
    #[default]
    OrderedReady,
    Parallel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodUpdatePolicy {
    /// Never recreate to apply an update; block instead.
    StrictInPlace,
    /// Update in place when possible, otherwise recreate.
    #[default]
    PreferInPlace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberUpdateStrategy {
    #[default]
    Serial,
    BestEffortParallel,
    Parallel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStrategyType {
    #[default]
    RollingUpdate,
    OnDelete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUpdateStrategy {
    #[serde(default, rename = "type")]
    pub strategy_type: UpdateStrategyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdate {
    /// How many instances the rollout should touch; defaults to all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<IntOrPercent>,
    /// Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrPercent>,
}
