//! Update revisions and their status bookkeeping.
//!
//! A revision hashes a resolved template with every field that can change
//! in place blanked out. Two instances share a revision exactly when
//! turning one into the other would need a recreate.

use std::collections::BTreeMap;

use iset_id::labels::RESTART_ANNOTATIONS;
use iset_reconcile::Revision;
use serde_json::json;
use tracing::debug;

use crate::error::EngineError;
use crate::model::{InstanceSet, PodTemplate};
use crate::pipeline::{CheckResult, Outcome, PassContext, Reconciler};
use crate::template::{ResolvedTemplate, DEFAULT_TEMPLATE};
use crate::tree::ObjectTree;

/// Copy of `template` without the fields an in-place update may touch.
pub fn filter_in_place_fields(template: &PodTemplate) -> PodTemplate {
    let mut filtered = template.clone();

    filtered.metadata.labels.clear();
    filtered
        .metadata
        .annotations
        .retain(|key, _| RESTART_ANNOTATIONS.contains(&key.as_str()));

    let spec = &mut filtered.spec;
    spec.active_deadline_seconds = None;
    spec.tolerations.clear();
    for container in spec.init_containers.iter_mut().chain(spec.containers.iter_mut()) {
        container.image.clear();
        container.resources.strip_cpu_and_memory();
    }

    filtered
}

/// Revision of instances built from `template` under `set`.
pub fn template_revision(set: &InstanceSet, template: &ResolvedTemplate) -> Result<Revision, EngineError> {
    let value = json!({
        "namespace": set.namespace(),
        "name": set.name(),
        "uid": &set.metadata.uid,
        "template": serde_json::to_value(filter_in_place_fields(&template.pod))?,
        "volumeClaimTemplates": serde_json::to_value(&template.claims)?,
    });
    Ok(Revision::from_json(&value))
}

/// Writes update and current revisions into status.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionReconciler;

impl Reconciler for RevisionReconciler {
    fn name(&self) -> &'static str {
        "revision"
    }

    fn pre_condition(&self, tree: &ObjectTree) -> CheckResult {
        if tree.root().metadata.is_deleting() {
            return CheckResult::Unsatisfied;
        }
        CheckResult::Satisfied
    }

    fn reconcile(&self, tree: &mut ObjectTree, ctx: &mut PassContext<'_>) -> Result<Outcome, EngineError> {
        let layout = ctx.layout()?;

        let current: BTreeMap<String, String> = tree
            .instances()
            .into_iter()
            .filter(|i| !i.revision().is_empty())
            .map(|i| (i.name().to_string(), i.revision().to_string()))
            .collect();

        let update_revision = layout
            .template_revisions
            .get(DEFAULT_TEMPLATE)
            .or_else(|| layout.template_revisions.values().next())
            .cloned()
            .unwrap_or_default();

        let all_current = layout.names.len() == current.len()
            && layout
                .revisions
                .iter()
                .all(|(name, rev)| current.get(name) == Some(rev));

        let status = &mut tree.root_mut().status;
        status.update_revisions = layout.revisions.clone();
        status.current_revisions = current;
        status.update_revision = update_revision;
        if all_current {
            status.current_revision = status.update_revision.clone();
        }

        debug!(
            update_revision = %status.update_revision,
            current_revision = %status.current_revision,
            "Revisions recorded"
        );
        Ok(Outcome::Continue)
    }
}
