//! # iset-id
//!
//! Identity primitives shared by every instance-set crate.
//!
//! ## Instance names
//!
//! Instances are addressed by a durable name derived from the owning
//! instance set, an optional template name and an ordinal:
//!
//! - separated naming: `{parent}-{template}-{ordinal}` (or `{parent}-{ordinal}`
//!   for the default template)
//! - flat naming: `{parent}-{ordinal}` for every template
//!
//! Names sort by parent name first and ordinal second, numerically, so
//! `foo-2` orders before `foo-10`.
//!
//! ## Typed IDs
//!
//! Bookkeeping records (reconcile passes, events) carry ULID-based IDs in a
//! prefixed format: `{prefix}_{ulid}`, e.g. `evt_01HV4Z2WQXKJNM8GPQY6VBKC3D`.

mod error;
pub mod labels;
mod macros;
mod names;
mod types;

pub use error::{IdError, NameError};
pub use names::*;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
