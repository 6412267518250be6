//! # iset-instanceset
//!
//! Orchestration engine for instance sets: named, ordinal-indexed groups
//! of workload instances with per-template overrides, role-aware rolling
//! updates and membership bookkeeping.
//!
//! ## Pass structure
//!
//! A reconcile pass loads one [`InstanceSet`](model::InstanceSet) and its
//! live instances into an [`ObjectTree`], runs the [`Pipeline`] stages
//! against it and hands back a [`CommitPlan`]. The engine does no I/O;
//! hosts load, commit and requeue.
//!
//! - **Resolve**: ordinals per template, desired names, revisions
//! - **Alignment**: create missing and scale in surplus instances
//! - **Status**: counters, conditions, member roles
//! - **Revision**: update/current revision bookkeeping
//! - **Update**: in-place or recreate updates, ordered by role
//!
//! ## Invariants
//!
//! - Given the same tree and clock, a pass produces the same plan
//! - A pass that fails commits nothing
//! - An ordinal is held by at most one instance of a set

pub mod alignment;
mod error;
pub mod lifecycle;
pub mod model;
pub mod ordinals;
pub mod pipeline;
pub mod plan;
pub mod resolve;
pub mod revision;
pub mod roles;
pub mod status;
pub mod template;
pub mod tree;
pub mod update;

pub use alignment::{parse_concurrency, AlignmentReconciler};
pub use error::{EngineError, ValidationError};
pub use lifecycle::{ActionTarget, LifecycleActions, LifecycleError, NoLifecycleActions};
pub use pipeline::{
    run_pass, CheckResult, DesiredLayout, EngineOptions, Outcome, PassContext, PassError,
    PassResult, Pipeline, Reconciler,
};
pub use plan::{UpdatePlan, VertexState};
pub use resolve::ResolveReconciler;
pub use revision::RevisionReconciler;
pub use roles::RolePriorities;
pub use status::StatusReconciler;
pub use template::{NameBuilder, ResolvedTemplate};
pub use tree::{Change, CommitPlan, ObjectTree};
pub use update::{parse_replicas_and_max_unavailable, update_policy, UpdatePolicy, UpdateReconciler};
