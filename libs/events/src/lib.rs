//! # iset-events
//!
//! Events emitted while reconciling an instance set.
//!
//! ## Design Principles
//!
//! - Events are immutable records attached to one involved object
//! - Events are buffered during a pass and only published at commit
//! - A pass that is discarded publishes none of its events
//!
//! ## Event Types
//!
//! - `Normal`: expected progress (member joined, instance recreated)
//! - `Warning`: something needs attention (invalid spec, ordinals not
//!   enough, lifecycle action failed)

mod envelope;
mod error;
mod recorder;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use recorder::EventRecorder;
pub use types::*;
