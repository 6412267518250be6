//! Sequencing of reconcile stages over one working tree.
//!
//! The standard pipeline runs, in order:
//! - Resolver: desired names, templates and revisions
//! - Alignment: create and delete instances
//! - Status: counters, conditions and member status
//! - Revision: update/current revision bookkeeping
//! - Update: in-place or recreate updates of outdated instances
//!
//! Stages only touch the [`ObjectTree`]. The caller commits the resulting
//! [`CommitPlan`] as a whole or not at all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use iset_events::Event;
use iset_id::PassId;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::alignment::AlignmentReconciler;
use crate::error::EngineError;
use crate::lifecycle::LifecycleActions;
use crate::model::{Instance, InstanceSet};
use crate::ordinals::OrdinalSet;
use crate::resolve::ResolveReconciler;
use crate::revision::RevisionReconciler;
use crate::status::StatusReconciler;
use crate::template::ResolvedTemplate;
use crate::tree::{CommitPlan, ObjectTree};
use crate::update::UpdateReconciler;

/// Whether a stage should run against the current tree.
#[derive(Debug)]
pub enum CheckResult {
    Satisfied,
    /// Skip this stage; the pass goes on.
    Unsatisfied,
    /// Abort the pass.
    Invalid(EngineError),
}

/// How a stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Continue, and run the pass again after the delay.
    RetryAfter(Duration),
}

impl Outcome {
    fn requeue_after(self) -> Option<Duration> {
        match self {
            Outcome::Continue => None,
            Outcome::RetryAfter(delay) => Some(delay),
        }
    }
}

/// Host capabilities the engine takes into account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Pods can change cpu/memory without a restart.
    pub pod_vertical_scaling: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pod_vertical_scaling: true,
        }
    }
}

/// What the Resolver stage decided this pass.
#[derive(Debug, Clone, Default)]
pub struct DesiredLayout {
    /// Desired instance names, sorted.
    pub names: Vec<String>,
    /// Instance name to resolved template.
    pub templates: BTreeMap<String, Arc<ResolvedTemplate>>,
    /// Instance name to update revision.
    pub revisions: BTreeMap<String, String>,
    /// Template name to update revision.
    pub template_revisions: BTreeMap<String, String>,
    /// Template name to assigned ordinals.
    pub template_ordinals: BTreeMap<String, OrdinalSet>,
}

impl DesiredLayout {
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn revision_of(&self, name: &str) -> Option<&str> {
        self.revisions.get(name).map(String::as_str)
    }

    /// The instance exists at its desired revision.
    pub fn is_updated(&self, instance: &Instance) -> bool {
        self.revision_of(instance.name()) == Some(instance.revision())
    }
}

/// Per-pass state shared by the stages.
pub struct PassContext<'a> {
    pub pass_id: PassId,
    pub options: EngineOptions,
    pub lifecycle: &'a dyn LifecycleActions,
    layout: Option<DesiredLayout>,
}

impl<'a> PassContext<'a> {
    pub fn new(pass_id: PassId, options: EngineOptions, lifecycle: &'a dyn LifecycleActions) -> Self {
        Self {
            pass_id,
            options,
            lifecycle,
            layout: None,
        }
    }

    pub fn layout(&self) -> Result<&DesiredLayout, EngineError> {
        self.layout.as_ref().ok_or(EngineError::LayoutMissing)
    }

    pub fn set_layout(&mut self, layout: DesiredLayout) {
        self.layout = Some(layout);
    }
}

/// One stage of the pipeline.
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &'static str;

    fn pre_condition(&self, tree: &ObjectTree) -> CheckResult;

    fn reconcile(&self, tree: &mut ObjectTree, ctx: &mut PassContext<'_>) -> Result<Outcome, EngineError>;
}

/// A failed pass with the events it recorded before failing.
#[derive(Debug, Error)]
#[error("reconcile pass failed: {error}")]
pub struct PassError {
    #[source]
    pub error: EngineError,
    pub events: Vec<Event>,
}

/// Result of a successful pass.
#[derive(Debug)]
pub struct PassResult {
    pub commit: CommitPlan,
    /// Earliest delay any stage asked to be run again after.
    pub requeue_after: Option<Duration>,
}

pub struct Pipeline {
    stages: Vec<Box<dyn Reconciler>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Reconciler>>) -> Self {
        Self { stages }
    }

    /// Resolver, Alignment, Status, Revision, Update.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ResolveReconciler),
            Box::new(AlignmentReconciler),
            Box::new(StatusReconciler),
            Box::new(RevisionReconciler),
            Box::new(UpdateReconciler),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage against `tree`.
    #[instrument(skip_all, fields(instance_set = %tree.root().metadata.key(), pass_id = %ctx.pass_id))]
    pub fn run(
        &self,
        tree: &mut ObjectTree,
        ctx: &mut PassContext<'_>,
    ) -> Result<Option<Duration>, EngineError> {
        debug!(stages = ?self.stage_names(), "Running reconcile stages");
        let mut requeue_after: Option<Duration> = None;

        for stage in &self.stages {
            match stage.pre_condition(tree) {
                CheckResult::Satisfied => {}
                CheckResult::Unsatisfied => {
                    debug!(stage = stage.name(), "Stage skipped");
                    continue;
                }
                CheckResult::Invalid(err) => return Err(err),
            }

            let outcome = stage.reconcile(tree, ctx)?;
            if let Some(delay) = outcome.requeue_after() {
                debug!(stage = stage.name(), delay_ms = delay.as_millis() as u64, "Stage requested requeue");
                requeue_after = Some(requeue_after.map_or(delay, |d| d.min(delay)));
            }
        }

        Ok(requeue_after)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

/// Runs one standard pass over a loaded instance set.
pub fn run_pass(
    root: InstanceSet,
    instances: Vec<Instance>,
    options: EngineOptions,
    lifecycle: &dyn LifecycleActions,
    now: DateTime<Utc>,
) -> Result<PassResult, PassError> {
    let pass_id = PassId::new();
    let mut tree = ObjectTree::new(root, instances, pass_id, now);
    let mut ctx = PassContext::new(pass_id, options, lifecycle);

    match Pipeline::standard().run(&mut tree, &mut ctx) {
        Ok(requeue_after) => {
            let commit = tree.into_commit();
            info!(
                instance_set = %commit.key,
                %pass_id,
                creates = commit.creates.len(),
                updates = commit.updates.len(),
                deletes = commit.deletes.len(),
                events = commit.events.len(),
                "Reconcile pass complete"
            );
            Ok(PassResult {
                commit,
                requeue_after,
            })
        }
        Err(error) => Err(PassError {
            error,
            events: tree.drain_events(),
        }),
    }
}
