//! Core worker machinery: credential store, workers, registry,
//! expansion.

pub mod credentials;
pub mod expansion;
pub mod registry;
pub mod worker;

pub use credentials::{Credential, CredentialStore};
pub use expansion::{expand, ExpandedTopology, ExpansionError};
pub use registry::{FailureReason, HealthChecker, WorkerRegistry};
pub use worker::{now_ms, worker_to_info, Worker, WorkerInfo, WorkerLoadGuard};
