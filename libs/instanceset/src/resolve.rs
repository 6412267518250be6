//! Resolver stage: turns the spec into a [`DesiredLayout`].

use std::collections::BTreeMap;

use iset_events::EventReason;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::pipeline::{CheckResult, DesiredLayout, Outcome, PassContext, Reconciler};
use crate::revision::template_revision;
use crate::template::NameBuilder;
use crate::tree::ObjectTree;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveReconciler;

impl Reconciler for ResolveReconciler {
    fn name(&self) -> &'static str {
        "resolve"
    }

    fn pre_condition(&self, tree: &ObjectTree) -> CheckResult {
        if tree.root().metadata.is_deleting() {
            return CheckResult::Unsatisfied;
        }
        CheckResult::Satisfied
    }

    fn reconcile(&self, tree: &mut ObjectTree, ctx: &mut PassContext<'_>) -> Result<Outcome, EngineError> {
        let builder = match NameBuilder::new(tree.root()) {
            Ok(builder) => builder,
            Err(err) => {
                let involved = tree.root().object_ref();
                let now = tree.now();
                tree.recorder_mut()
                    .warning(involved, EventReason::InvalidSpec, err.to_string(), now);
                return Err(EngineError::InvalidSpec(err));
            }
        };

        if !builder.ordinals_not_enough().is_empty() {
            let detail = builder
                .ordinals_not_enough()
                .iter()
                .map(|(template, missing)| format!("{template:?}: {missing}"))
                .collect::<Vec<_>>()
                .join(", ");
            warn!(shortfall = %detail, "Ordinals not enough");
            let involved = tree.root().object_ref();
            let now = tree.now();
            tree.recorder_mut().warning(
                involved,
                EventReason::OrdinalsNotEnough,
                format!("ordinals not enough for templates: {detail}"),
                now,
            );
        }

        let mut template_revisions = BTreeMap::new();
        for template in builder.templates() {
            let revision = template_revision(tree.root(), template)?;
            template_revisions.insert(template.name.clone(), revision.into_string());
        }

        let templates = builder.build_instance_name_to_template_map();
        let revisions = templates
            .iter()
            .filter_map(|(name, template)| {
                template_revisions
                    .get(&template.name)
                    .map(|rev| (name.clone(), rev.clone()))
            })
            .collect();

        let layout = DesiredLayout {
            names: builder.generate_all_instance_names(),
            templates,
            revisions,
            template_revisions,
            template_ordinals: builder.template_ordinals().clone(),
        };
        debug!(desired = layout.names.len(), live = tree.len(), "Desired layout resolved");

        ctx.set_layout(layout);
        Ok(Outcome::Continue)
    }
}
