//! Data model of the instance-set engine.
//!
//! Field names serialize in camelCase, following Kubernetes JSON
//! conventions.

mod instance;
mod meta;
mod objects;
mod pod;
mod spec;
mod status;

pub use instance::*;
pub use meta::*;
pub use objects::*;
pub use pod::*;
pub use spec::*;
pub use status::*;
