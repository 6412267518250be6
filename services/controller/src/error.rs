//! Controller error types.

use iset_instanceset::PassError;
use thiserror::Error;

/// Object store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No instance set is stored under the key.
    #[error("instance set not found: {0}")]
    NotFound(String),

    /// The stored resource version moved since the tree was loaded
    /// (optimistic concurrency).
    #[error("resource version conflict on {key}: expected {expected}, got {actual}")]
    Conflict {
        key: String,
        expected: String,
        actual: String,
    },

    /// A create targets an instance that already exists.
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    /// An update or delete targets an instance that is gone.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Failed to read the seed file.
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors a reconcile of one key can end with.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pass(#[from] PassError),

    #[error("reconcile task failed: {0}")]
    Join(String),
}

impl ControllerError {
    /// A conflict means the pass ran on stale state; run it again at once.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Conflict { .. })
                | Self::Store(StoreError::AlreadyExists(_))
                | Self::Store(StoreError::InstanceNotFound(_))
        )
    }

    /// Whether a backoff retry can help. An invalid spec waits for the
    /// next edit instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pass(err) => !err.error.is_invalid_spec(),
            Self::Store(StoreError::NotFound(_)) => false,
            Self::Store(_) | Self::Join(_) => true,
        }
    }
}
