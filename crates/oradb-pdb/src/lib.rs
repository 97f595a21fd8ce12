//! PluggableDatabase controller for oradb
//!
//! Lifecycle verbs are carried out by the data-access gateway that fronts a
//! container database:
//!
//! ```text
//! PluggableDatabase ──► controller ──► gateway (basic auth + mTLS) ──► CDB
//! ```
//!
//! - [`requests`]: the request each action turns into
//! - [`gateway`]: transport, and the two error channels of a response
//! - [`controller`]: one action per spec change, recorded in status

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod gateway;
pub mod requests;

pub use controller::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl, PDB_FINALIZER,
};
pub use error::PdbError;
pub use gateway::{GatewayClient, ReqwestGateway};

pub use oradb_common::{Error, Result};
