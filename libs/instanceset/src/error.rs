//! Engine error types.

use iset_reconcile::ReconcileError;
use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Configuration errors found by validating an instance set.
///
/// A pass that hits one aborts without mutating anything.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("instance template name cannot be empty")]
    EmptyTemplateName,

    #[error("duplicate instance template name: {0}")]
    DuplicateTemplateName(String),

    #[error("total replicas in instances({in_templates}) should not greater than replicas in spec({total})")]
    ReplicasOverflow { in_templates: i64, total: i32 },

    #[error("negative replicas({replicas}) in template '{template}'")]
    NegativeReplicas { template: String, replicas: i32 },

    #[error("range's end({end}) must >= start({start})")]
    InvalidRange { start: i32, end: i32 },

    #[error("ordinal({0}) must >= 0")]
    NegativeOrdinal(i32),

    #[error("duplicate ordinal({0})")]
    DuplicateOrdinal(i32),

    #[error("available ordinals less than replicas in template '{template}': {available} < {replicas}")]
    InsufficientOrdinals {
        template: String,
        available: usize,
        replicas: i32,
    },

    #[error("duplicate instance name: {0}")]
    DuplicateInstanceName(String),
}

/// Errors that abort a reconcile pass.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid instance set spec: {0}")]
    InvalidSpec(#[from] ValidationError),

    #[error("instance already exists in the working tree: {0}")]
    AlreadyExists(String),

    #[error("instance not found in the working tree: {0}")]
    NotFound(String),

    #[error("no resolved template for instance {0}")]
    TemplateNotFound(String),

    #[error("desired layout is not resolved yet")]
    LayoutMissing,

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Configuration errors do not go away by retrying.
    pub fn is_invalid_spec(&self) -> bool {
        matches!(self, EngineError::InvalidSpec(_))
    }
}
