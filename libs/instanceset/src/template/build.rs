//! Materializing an instance from its resolved template.

use std::collections::BTreeMap;

use iset_id::{compose_claim_name, headless_service_name, labels};

use super::ResolvedTemplate;
use crate::model::{
    ClaimObject, Instance, InstanceSet, ManagedObject, ObjectMeta, PodObject, Volume,
};

/// Labels every object owned by `set` carries.
pub fn match_labels(set: &InstanceSet) -> BTreeMap<String, String> {
    let mut labels = set.spec.selector.clone();
    labels.insert(labels::INSTANCE_SET_NAME.to_string(), set.name().to_string());
    labels
}

/// Builds the instance `name` from `template` at `revision`.
pub fn build_instance(
    set: &InstanceSet,
    name: &str,
    template: &ResolvedTemplate,
    revision: &str,
) -> Instance {
    let namespace = set.namespace();
    let owner_labels = match_labels(set);

    let mut metadata = ObjectMeta::named(namespace, name);
    metadata.labels = template.pod.metadata.labels.clone();
    metadata.labels.extend(owner_labels.clone());
    metadata
        .labels
        .insert(labels::TEMPLATE_NAME.to_string(), template.name.clone());
    metadata
        .labels
        .insert(labels::REVISION_HASH.to_string(), revision.to_string());
    metadata
        .labels
        .insert(labels::INSTANCE_NAME.to_string(), name.to_string());
    metadata.annotations = template.pod.metadata.annotations.clone();

    let mut spec = template.pod.spec.clone();
    spec.hostname = Some(name.to_string());
    spec.subdomain = Some(headless_service_name(set.name()));

    let mut claims = Vec::with_capacity(template.claims.len());
    for claim in &template.claims {
        let claim_name = compose_claim_name(&claim.name, name);

        let mut claim_meta = ObjectMeta::named(namespace, &claim_name);
        claim_meta.labels = owner_labels.clone();
        claim_meta.labels.extend(claim.metadata.labels.clone());
        claim_meta
            .labels
            .insert(labels::INSTANCE_NAME.to_string(), name.to_string());
        if !template.is_default() {
            claim_meta
                .labels
                .insert(labels::TEMPLATE_NAME.to_string(), template.name.clone());
        }
        claim_meta.annotations = claim.metadata.annotations.clone();

        if !spec.volumes.iter().any(|v| v.name == claim.name) {
            spec.volumes.push(Volume {
                name: claim.name.clone(),
                source: serde_json::json!({
                    "persistentVolumeClaim": { "claimName": claim_name }
                }),
            });
        }

        claims.push(ClaimObject {
            metadata: claim_meta,
            spec: claim.spec.clone(),
        });
    }

    let assistants = if set.spec.clone_assistant_objects {
        set.spec
            .assistant_objects
            .iter()
            .map(|object| clone_assistant(set, object))
            .collect()
    } else {
        Vec::new()
    };

    Instance {
        pod: PodObject { metadata, spec },
        claims,
        assistants,
        ..Default::default()
    }
}

fn clone_assistant(set: &InstanceSet, object: &ManagedObject) -> ManagedObject {
    let mut cloned = object.clone();
    let metadata = cloned.metadata_mut();
    if metadata.namespace.is_empty() {
        metadata.namespace = set.namespace().to_string();
    }
    metadata
        .labels
        .insert(labels::INSTANCE_SET_NAME.to_string(), set.name().to_string());
    metadata.resource_version.clear();
    metadata.uid.clear();
    cloned
}
