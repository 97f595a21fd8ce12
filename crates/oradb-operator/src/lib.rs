//! oradb Kubernetes operator
//!
//! Wires the SingleInstanceDatabase, DataguardBroker and PluggableDatabase
//! controllers into one process.

#![deny(missing_docs)]

pub mod cli;
pub mod controller_runner;
pub mod startup;
