//! Instance names and their resolved templates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use iset_id::{compose_instance_name, compose_name, sort_names, template_prefix};
use tracing::debug;

use super::merge::{merge_claim_templates, merge_template};
use super::resolver::{NamingMode, Resolution, Resolver, TemplateDemand};
use crate::error::ValidationError;
use crate::model::{InstanceSet, InstanceSetStatus, InstanceTemplate, PodTemplate, VolumeClaimTemplate};
use crate::ordinals::{flat_offline_ordinals, offline_ordinals_with_prefix, OrdinalSet, OrdinalSpace};

/// The default template's name.
pub const DEFAULT_TEMPLATE: &str = "";

/// A template with the base pod template already layered in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    pub name: String,
    pub replicas: i32,
    pub constraint: OrdinalSpace,
    pub pod: PodTemplate,
    pub claims: Vec<VolumeClaimTemplate>,
}

impl ResolvedTemplate {
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

/// Builds the desired instance names of an instance set.
#[derive(Debug, Clone)]
pub struct NameBuilder {
    parent: String,
    mode: NamingMode,
    templates: Vec<Arc<ResolvedTemplate>>,
    resolution: Resolution,
}

impl NameBuilder {
    /// Validates the set and resolves ordinals for every template.
    pub fn new(set: &InstanceSet) -> Result<Self, ValidationError> {
        Self::validate(set)?;

        let parent = set.name().to_string();
        let mode = NamingMode::from_flag(set.spec.flat_instance_ordinal);
        let templates = resolved_templates(set)?;

        let demands: Vec<TemplateDemand> = templates
            .iter()
            .map(|t| {
                let offline = match mode {
                    NamingMode::Separated => offline_ordinals_with_prefix(
                        &set.spec.offline_instances,
                        &template_prefix(&parent, &t.name),
                    ),
                    NamingMode::Flat => OrdinalSet::new(),
                };
                TemplateDemand::new(t.name.clone(), t.replicas.max(0) as usize)
                    .with_constraint(t.constraint.clone())
                    .with_offline(offline)
            })
            .collect();

        let resolution = Resolver::new(mode).resolve(
            &demands,
            &current_ordinals(&set.status),
            &flat_offline_ordinals(&set.spec.offline_instances),
        );
        debug!(
            instance_set = %set.name(),
            ?mode,
            assigned = resolution.total_assigned(),
            shortfall = resolution.total_shortfall(),
            "Resolved ordinals"
        );

        let builder = Self {
            parent,
            mode,
            templates,
            resolution,
        };

        let mut seen = BTreeSet::new();
        for name in builder.names_with_templates().map(|(name, _)| name) {
            if !seen.insert(name.clone()) {
                return Err(ValidationError::DuplicateInstanceName(name));
            }
        }

        Ok(builder)
    }

    /// Checks the template list and ordinal constraints of `set`.
    pub fn validate(set: &InstanceSet) -> Result<(), ValidationError> {
        let spec = &set.spec;
        let mode = NamingMode::from_flag(spec.flat_instance_ordinal);

        let mut names = BTreeSet::new();
        let mut in_templates: i64 = 0;
        for template in &spec.instances {
            if template.name.is_empty() {
                return Err(ValidationError::EmptyTemplateName);
            }
            if !names.insert(template.name.as_str()) {
                return Err(ValidationError::DuplicateTemplateName(template.name.clone()));
            }
            if template.replicas() < 0 {
                return Err(ValidationError::NegativeReplicas {
                    template: template.name.clone(),
                    replicas: template.replicas(),
                });
            }
            in_templates += i64::from(template.replicas());
        }
        if in_templates > i64::from(spec.replicas) {
            return Err(ValidationError::ReplicasOverflow {
                in_templates,
                total: spec.replicas,
            });
        }

        let default_replicas = default_template_replicas(set);
        let mut constrained: Vec<(&str, i32, OrdinalSpace)> = Vec::new();
        let default_space = OrdinalSpace::from_ordinals(&spec.default_template_ordinals)?;
        if !default_space.is_empty() {
            constrained.push((DEFAULT_TEMPLATE, default_replicas, default_space));
        }
        for template in &spec.instances {
            let space = OrdinalSpace::from_ordinals(&template.ordinals)?;
            if !space.is_empty() {
                constrained.push((template.name.as_str(), template.replicas(), space));
            }
        }

        if mode == NamingMode::Flat {
            for (i, (_, _, a)) in constrained.iter().enumerate() {
                for (_, _, b) in constrained.iter().skip(i + 1) {
                    if let Some(ordinal) = a.first_common(b) {
                        return Err(ValidationError::DuplicateOrdinal(ordinal));
                    }
                }
            }
        }

        let flat_offline = flat_offline_ordinals(&spec.offline_instances);
        for (name, replicas, space) in &constrained {
            if name.is_empty() && default_replicas <= 0 {
                continue;
            }
            let offline = match mode {
                NamingMode::Flat => flat_offline.clone(),
                NamingMode::Separated => offline_ordinals_with_prefix(
                    &spec.offline_instances,
                    &template_prefix(set.name(), name),
                ),
            };
            let available = space.available_excluding(&offline);
            if available < u64::try_from(*replicas).unwrap_or(0) {
                return Err(ValidationError::InsufficientOrdinals {
                    template: name.to_string(),
                    available: usize::try_from(available).unwrap_or(usize::MAX),
                    replicas: *replicas,
                });
            }
        }

        Ok(())
    }

    pub fn mode(&self) -> NamingMode {
        self.mode
    }

    /// Templates in declaration order, the default template first.
    pub fn templates(&self) -> &[Arc<ResolvedTemplate>] {
        &self.templates
    }

    /// Ordinals assigned to each template.
    pub fn template_ordinals(&self) -> &BTreeMap<String, OrdinalSet> {
        &self.resolution.ordinals
    }

    /// Templates that could not get all their ordinals, with the missing
    /// count. Empty when every template is satisfied.
    pub fn ordinals_not_enough(&self) -> &BTreeMap<String, usize> {
        &self.resolution.shortfall
    }

    /// Every desired instance name, sorted by parent then ordinal.
    pub fn generate_all_instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names_with_templates().map(|(n, _)| n).collect();
        sort_names(&mut names);
        names
    }

    /// Desired instance name to the template it is built from.
    pub fn build_instance_name_to_template_map(&self) -> BTreeMap<String, Arc<ResolvedTemplate>> {
        self.names_with_templates().collect()
    }

    fn names_with_templates(&self) -> impl Iterator<Item = (String, Arc<ResolvedTemplate>)> + '_ {
        self.templates.iter().flat_map(move |template| {
            self.resolution
                .ordinals
                .get(&template.name)
                .into_iter()
                .flatten()
                .map(move |ordinal| {
                    let name = match self.mode {
                        NamingMode::Flat => compose_name(&self.parent, *ordinal),
                        NamingMode::Separated => {
                            compose_instance_name(&self.parent, &template.name, *ordinal)
                        }
                    };
                    (name, Arc::clone(template))
                })
        })
    }
}

/// Replicas left for the default template.
pub fn default_template_replicas(set: &InstanceSet) -> i32 {
    let in_templates: i64 = set
        .spec
        .instances
        .iter()
        .map(|t| i64::from(t.replicas()))
        .sum();
    (i64::from(set.spec.replicas) - in_templates)
        .clamp(0, i64::from(i32::MAX)) as i32
}

fn resolved_templates(set: &InstanceSet) -> Result<Vec<Arc<ResolvedTemplate>>, ValidationError> {
    let spec = &set.spec;
    let mut templates = Vec::with_capacity(spec.instances.len() + 1);

    let default_replicas = default_template_replicas(set);
    if default_replicas > 0 {
        templates.push(Arc::new(ResolvedTemplate {
            name: DEFAULT_TEMPLATE.to_string(),
            replicas: default_replicas,
            constraint: OrdinalSpace::from_ordinals(&spec.default_template_ordinals)?,
            pod: spec.template.clone(),
            claims: spec.volume_claim_templates.clone(),
        }));
    }

    for template in &spec.instances {
        templates.push(Arc::new(resolve_one(set, template)?));
    }

    Ok(templates)
}

fn resolve_one(set: &InstanceSet, template: &InstanceTemplate) -> Result<ResolvedTemplate, ValidationError> {
    Ok(ResolvedTemplate {
        name: template.name.clone(),
        replicas: template.replicas(),
        constraint: OrdinalSpace::from_ordinals(&template.ordinals)?,
        pod: merge_template(&set.spec.template, template),
        claims: merge_claim_templates(&set.spec.volume_claim_templates, template),
    })
}

/// Ordinals each template held as of the last status update.
fn current_ordinals(status: &InstanceSetStatus) -> BTreeMap<String, OrdinalSet> {
    let mut current = BTreeMap::new();
    if !status.ordinals.is_empty() {
        current.insert(
            DEFAULT_TEMPLATE.to_string(),
            status.ordinals.iter().copied().collect(),
        );
    }
    for template in &status.templates_status {
        current.insert(template.name.clone(), template.ordinals.iter().copied().collect());
    }
    current
}
