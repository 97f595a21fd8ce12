//! SingleInstanceDatabase controller for oradb
//!
//! Drives each database through `Validating → Provisioning → WaitingReady →
//! Configuring → Ready`. Kubernetes objects are converged by the resource
//! synchronizer in [`sync`]; everything inside the database goes through
//! the command executor from `oradb-exec`.
//!
//! Related crates:
//! - `oradb-common`: CRD types, error taxonomy, condition reporting
//! - `oradb-exec`: typed commands and pod exec transport
//! - `oradb-dataguard`: replication groups built from these databases

pub mod controller;
pub mod error;
pub mod phases;
pub mod sync;
pub mod templates;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl,
    DATABASE_FINALIZER,
};
pub use error::DatabaseError;

pub use oradb_common::{Error, Result};
