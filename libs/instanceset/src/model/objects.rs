//! Closed set of object kinds an instance owns, with per-kind merge rules.
//!
//! Every variant implements [`Mergeable`] once:
//!
//! - `Pod`: only in-place mutable fields (labels, annotations, images,
//!   tolerations, activeDeadlineSeconds and optionally cpu/memory)
//! - `Pvc`: access modes and storage expansion
//! - `ConfigMap` / `Secret`: data
//! - `Service`: labels and annotations merged, spec replaced
//! - `ServiceAccount` / `Role` / `RoleBinding`: body replaced

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::meta::is_subset;
use super::{append_unique, ClaimSpec, ObjectMeta, PodSpec};

/// Diff and merge capability of a managed object.
pub trait Mergeable {
    /// Returns true if applying `desired` would change `self`.
    fn differs_from(&self, desired: &Self) -> bool;

    /// Merges the mutable parts of `desired` into `self`.
    fn merge_from(&mut self, desired: &Self);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ManagedObject {
    Pod(PodObject),
    #[serde(rename = "PersistentVolumeClaim")]
    Pvc(ClaimObject),
    ConfigMap(DataObject),
    Secret(DataObject),
    ServiceAccount(GenericObject),
    Role(GenericObject),
    RoleBinding(GenericObject),
    Service(GenericObject),
}

impl ManagedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ManagedObject::Pod(_) => "Pod",
            ManagedObject::Pvc(_) => "PersistentVolumeClaim",
            ManagedObject::ConfigMap(_) => "ConfigMap",
            ManagedObject::Secret(_) => "Secret",
            ManagedObject::ServiceAccount(_) => "ServiceAccount",
            ManagedObject::Role(_) => "Role",
            ManagedObject::RoleBinding(_) => "RoleBinding",
            ManagedObject::Service(_) => "Service",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Pod(o) => &o.metadata,
            ManagedObject::Pvc(o) => &o.metadata,
            ManagedObject::ConfigMap(o) | ManagedObject::Secret(o) => &o.metadata,
            ManagedObject::ServiceAccount(o)
            | ManagedObject::Role(o)
            | ManagedObject::RoleBinding(o)
            | ManagedObject::Service(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::Pod(o) => &mut o.metadata,
            ManagedObject::Pvc(o) => &mut o.metadata,
            ManagedObject::ConfigMap(o) | ManagedObject::Secret(o) => &mut o.metadata,
            ManagedObject::ServiceAccount(o)
            | ManagedObject::Role(o)
            | ManagedObject::RoleBinding(o)
            | ManagedObject::Service(o) => &mut o.metadata,
        }
    }
}

impl Mergeable for ManagedObject {
    fn differs_from(&self, desired: &Self) -> bool {
        match (self, desired) {
            (ManagedObject::Pod(a), ManagedObject::Pod(b)) => a.differs_from(b),
            (ManagedObject::Pvc(a), ManagedObject::Pvc(b)) => a.differs_from(b),
            (ManagedObject::ConfigMap(a), ManagedObject::ConfigMap(b))
            | (ManagedObject::Secret(a), ManagedObject::Secret(b)) => a.differs_from(b),
            (ManagedObject::Service(a), ManagedObject::Service(b)) => {
                !is_subset(&b.metadata.labels, &a.metadata.labels)
                    || !is_subset(&b.metadata.annotations, &a.metadata.annotations)
                    || a.body != b.body
            }
            (ManagedObject::ServiceAccount(a), ManagedObject::ServiceAccount(b))
            | (ManagedObject::Role(a), ManagedObject::Role(b))
            | (ManagedObject::RoleBinding(a), ManagedObject::RoleBinding(b)) => a.body != b.body,
            _ => true,
        }
    }

    fn merge_from(&mut self, desired: &Self) {
        match (self, desired) {
            (ManagedObject::Pod(a), ManagedObject::Pod(b)) => a.merge_from(b),
            (ManagedObject::Pvc(a), ManagedObject::Pvc(b)) => a.merge_from(b),
            (ManagedObject::ConfigMap(a), ManagedObject::ConfigMap(b))
            | (ManagedObject::Secret(a), ManagedObject::Secret(b)) => a.merge_from(b),
            (ManagedObject::Service(a), ManagedObject::Service(b)) => {
                a.metadata.labels.extend(b.metadata.labels.clone());
                a.metadata.annotations.extend(b.metadata.annotations.clone());
                a.body = b.body.clone();
            }
            (ManagedObject::ServiceAccount(a), ManagedObject::ServiceAccount(b))
            | (ManagedObject::Role(a), ManagedObject::Role(b))
            | (ManagedObject::RoleBinding(a), ManagedObject::RoleBinding(b)) => {
                a.body = b.body.clone();
            }
            (current, desired) => *current = desired.clone(),
        }
    }
}

/// The pod an instance runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodObject {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

impl PodObject {
    /// Compares labels, annotations, images, tolerations and the active
    /// deadline. Desired labels/annotations/tolerations only need to be
    /// present; extras set by others (the role label) are ignored.
    pub fn basic_fields_differ(&self, desired: &PodObject) -> bool {
        if !is_subset(&desired.metadata.labels, &self.metadata.labels)
            || !is_subset(&desired.metadata.annotations, &self.metadata.annotations)
        {
            return true;
        }
        if self.spec.active_deadline_seconds != desired.spec.active_deadline_seconds {
            return true;
        }
        if desired
            .spec
            .tolerations
            .iter()
            .any(|t| !self.spec.tolerations.contains(t))
        {
            return true;
        }
        let image_differs = |current: &[super::Container], wanted: &[super::Container]| {
            wanted.iter().any(|w| {
                current
                    .iter()
                    .find(|c| c.name == w.name)
                    .is_some_and(|c| c.image != w.image)
            })
        };
        image_differs(&self.spec.init_containers, &desired.spec.init_containers)
            || image_differs(&self.spec.containers, &desired.spec.containers)
    }

    /// Compares cpu and memory of containers matched by name.
    pub fn resources_differ(&self, desired: &PodObject) -> bool {
        desired.spec.containers.iter().any(|w| {
            self.spec
                .containers
                .iter()
                .find(|c| c.name == w.name)
                .is_some_and(|c| !c.resources.cpu_and_memory_eq(&w.resources))
        })
    }

    /// Merges everything in [`PodObject::merge_from`] except resources.
    pub fn merge_basic_fields(&mut self, desired: &PodObject) {
        self.metadata.labels.extend(desired.metadata.labels.clone());
        self.metadata
            .annotations
            .extend(desired.metadata.annotations.clone());
        self.spec.active_deadline_seconds = desired.spec.active_deadline_seconds;
        append_unique(&mut self.spec.tolerations, &desired.spec.tolerations);
        for wanted in &desired.spec.init_containers {
            if let Some(c) = self
                .spec
                .init_containers
                .iter_mut()
                .find(|c| c.name == wanted.name)
            {
                c.image = wanted.image.clone();
            }
        }
        for wanted in &desired.spec.containers {
            if let Some(c) = self.spec.containers.iter_mut().find(|c| c.name == wanted.name) {
                c.image = wanted.image.clone();
            }
        }
    }

    /// Merges cpu and memory of containers matched by name.
    pub fn merge_resources(&mut self, desired: &PodObject) {
        for wanted in &desired.spec.containers {
            if let Some(c) = self.spec.containers.iter_mut().find(|c| c.name == wanted.name) {
                c.resources.merge_cpu_and_memory(&wanted.resources);
            }
        }
    }
}

impl Mergeable for PodObject {
    fn differs_from(&self, desired: &Self) -> bool {
        self.basic_fields_differ(desired) || self.resources_differ(desired)
    }

    fn merge_from(&mut self, desired: &Self) {
        self.merge_basic_fields(desired);
        self.merge_resources(desired);
    }
}

/// A persistent volume claim owned by one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimObject {
    pub metadata: ObjectMeta,
    pub spec: ClaimSpec,
}

impl Mergeable for ClaimObject {
    fn differs_from(&self, desired: &Self) -> bool {
        self.spec.access_modes != desired.spec.access_modes
            || (desired.spec.storage.is_some() && self.spec.storage != desired.spec.storage)
    }

    fn merge_from(&mut self, desired: &Self) {
        self.spec.access_modes = desired.spec.access_modes.clone();
        if desired.spec.storage.is_some() {
            self.spec.storage = desired.spec.storage.clone();
        }
    }
}

/// ConfigMap or Secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Mergeable for DataObject {
    fn differs_from(&self, desired: &Self) -> bool {
        self.data != desired.data
    }

    fn merge_from(&mut self, desired: &Self) {
        self.data = desired.data.clone();
    }
}

/// Objects whose body is replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub body: serde_json::Value,
}
