//! Hand-made live instances.

use chrono::{DateTime, Utc};
use iset_id::labels;
use iset_instanceset::model::{Instance, InstancePhase, ObjectMeta, PodObject};

use crate::TEST_NAMESPACE;

/// A pending instance with no labels.
pub fn pending(name: &str) -> Instance {
    Instance {
        pod: PodObject {
            metadata: ObjectMeta::named(TEST_NAMESPACE, name),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A running, ready instance, ready since `since`.
pub fn running(name: &str, since: DateTime<Utc>) -> Instance {
    let mut instance = pending(name);
    mark_ready(&mut instance, since);
    instance
}

/// Moves `instance` to Running and ready.
pub fn mark_ready(instance: &mut Instance, since: DateTime<Utc>) {
    instance.status.phase = InstancePhase::Running;
    if !instance.status.ready {
        instance.status.ready = true;
        instance.status.ready_since = Some(since);
    }
}

pub fn mark_not_ready(instance: &mut Instance) {
    instance.status.ready = false;
    instance.status.ready_since = None;
}

pub fn mark_failed(instance: &mut Instance) {
    mark_not_ready(instance);
    instance.status.phase = InstancePhase::Failed;
}

/// Sets the probed role label.
pub fn set_role(instance: &mut Instance, role: &str) {
    instance
        .pod
        .metadata
        .labels
        .insert(labels::ROLE.to_string(), role.to_string());
}

pub fn with_role(mut instance: Instance, role: &str) -> Instance {
    set_role(&mut instance, role);
    instance
}

pub fn with_revision(mut instance: Instance, revision: &str) -> Instance {
    instance
        .pod
        .metadata
        .labels
        .insert(labels::REVISION_HASH.to_string(), revision.to_string());
    instance
}

/// Names of `instances`, in order.
pub fn names<'a>(instances: impl IntoIterator<Item = &'a Instance>) -> Vec<String> {
    instances.into_iter().map(|i| i.name().to_string()).collect()
}
