//! Layering an instance template over the base pod template.

use crate::model::{
    append_unique, merge_by_name, InstanceTemplate, PodTemplate, SchedulingPolicy,
    VolumeClaimTemplate,
};

/// Applies `overrides` to a copy of `base`.
///
/// Labels, annotations, scheduling policy and volumes apply to the whole
/// pod. Image, cpu/memory resources, env and volume mounts apply to the
/// first container only.
pub fn merge_template(base: &PodTemplate, overrides: &InstanceTemplate) -> PodTemplate {
    let mut merged = base.clone();

    merged.metadata.labels.extend(overrides.labels.clone());
    merged
        .metadata
        .annotations
        .extend(overrides.annotations.clone());

    if let Some(policy) = &overrides.scheduling_policy {
        merge_scheduling_policy(&mut merged, policy);
    }

    merge_by_name(&mut merged.spec.volumes, &overrides.volumes);

    if let Some(first) = merged.spec.containers.first_mut() {
        if let Some(image) = &overrides.image {
            first.image = image.clone();
        }
        if let Some(resources) = &overrides.resources {
            first.resources.merge_cpu_and_memory(resources);
        }
        merge_by_name(&mut first.env, &overrides.env);
        merge_by_name(&mut first.volume_mounts, &overrides.volume_mounts);
    }

    merged
}

/// Claim templates of the base overridden by name with the template's.
pub fn merge_claim_templates(
    base: &[VolumeClaimTemplate],
    overrides: &InstanceTemplate,
) -> Vec<VolumeClaimTemplate> {
    let mut merged = base.to_vec();
    merge_by_name(&mut merged, &overrides.volume_claim_templates);
    merged
}

fn merge_scheduling_policy(template: &mut PodTemplate, policy: &SchedulingPolicy) {
    let spec = &mut template.spec;
    if policy.scheduler_name.is_some() {
        spec.scheduler_name = policy.scheduler_name.clone();
    }
    if policy.node_name.is_some() {
        spec.node_name = policy.node_name.clone();
    }
    spec.node_selector.extend(policy.node_selector.clone());
    append_unique(&mut spec.tolerations, &policy.tolerations);
    append_unique(
        &mut spec.topology_spread_constraints,
        &policy.topology_spread_constraints,
    );
    if let Some(affinity) = &policy.affinity {
        match spec.affinity.as_mut() {
            Some(existing) => merge_json(existing, affinity),
            None => spec.affinity = Some(affinity.clone()),
        }
    }
}

/// Deep-merges objects; arrays are unioned; other values are replaced.
fn merge_json(dst: &mut serde_json::Value, src: &serde_json::Value) {
    use serde_json::Value;

    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => {
            for (key, value) in s {
                match d.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        d.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(d), Value::Array(s)) => append_unique(d, s),
        (d, s) => *d = s.clone(),
    }
}
