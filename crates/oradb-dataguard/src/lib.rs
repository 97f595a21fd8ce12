//! DataguardBroker controller for oradb
//!
//! Turns a set of SingleInstanceDatabases into one replication group:
//! - [`group`]: membership and roles, rebuilt from the broker every pass
//! - [`broker`]: typed broker reads and the scripts that create or extend
//!   the configuration
//! - [`lock`]: the paired marker lock taken around role changes
//! - [`switchover`]: planned role change with roles read back afterwards
//! - [`converge`]: one coordinator pass, driven by [`controller`]

pub mod broker;
pub mod controller;
pub mod converge;
pub mod error;
pub mod group;
pub mod lock;
pub mod switchover;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl,
    BROKER_FINALIZER,
};
pub use error::BrokerError;
pub use group::{Member, ReplicationGroup};

pub use oradb_common::{Error, Result};
