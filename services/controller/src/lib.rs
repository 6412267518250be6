//! Instance-set controller library.
//!
//! This crate primarily ships an `instanceset-controller` binary, but we
//! expose a small library surface to enable integration testing and reuse.

pub mod config;
pub mod error;
pub mod queue;
pub mod store;
pub mod worker;

pub use config::Config;
pub use error::{ControllerError, ControllerResult, StoreError};
pub use queue::WorkQueue;
pub use store::{MemoryStore, ObjectStore, RecordedEvent, Snapshot};
pub use worker::{ControllerWorker, WorkerConfig};
