//! Custom Resource Definitions for oradb
//!
//! All kinds live in the `database.oradb.io/v1alpha1` group and are namespaced.

mod broker;
mod database;
mod pdb;
mod types;

pub use broker::{
    BrokerPhase, DataguardBroker, DataguardBrokerSpec, DataguardBrokerStatus, ProtectionMode,
};
pub use database::{
    AdminPasswordSpec, DatabasePhase, Edition, ImageSpec, InitParams, PersistenceSpec,
    SingleInstanceDatabase, SingleInstanceDatabaseSpec, SingleInstanceDatabaseStatus,
};
pub use pdb::{
    DropAction, PdbAction, PdbPhase, PdbState, PluggableDatabase, PluggableDatabaseSpec,
    PluggableDatabaseStatus, TlsSecretRef,
};
pub use types::{Condition, ConditionStatus, DatabaseRole, HealthStatus, SecretKeyRef};
