//! # iset-testing
//!
//! Fixtures shared by the instance-set test suites.
//!
//! - [`InstanceSetBuilder`]: fluent construction of specs
//! - [`instance`] helpers: hand-made live instances in a given state
//! - [`Cluster`]: applies commit plans and plays the kubelet, so tests can
//!   drive several passes to convergence
//! - [`RecordingLifecycle`]: lifecycle actions that record every call and
//!   fail on demand

mod builder;
mod cluster;
pub mod instance;
mod lifecycle;

pub use builder::InstanceSetBuilder;
pub use cluster::Cluster;
pub use lifecycle::{RecordedCall, RecordingLifecycle};

/// Namespace every fixture lives in.
pub const TEST_NAMESPACE: &str = "default";
