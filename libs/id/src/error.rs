//! Parse errors for typed IDs and instance names.

use thiserror::Error;

/// Why a string is not a valid typed ID such as `evt_01H...`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("empty id")]
    Empty,

    #[error("id has prefix '{actual}', want '{expected}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// No `_` between prefix and ULID.
    #[error("id has no '_' separator")]
    MissingSeparator,

    #[error("id suffix is not a ULID: {0}")]
    InvalidUlid(String),
}

/// Errors raised while composing or decoding instance names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("instance name cannot be empty")]
    Empty,

    #[error("instance name '{0}' has no ordinal suffix")]
    MissingOrdinal(String),
}
