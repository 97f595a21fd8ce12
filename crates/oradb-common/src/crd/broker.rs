//! DataguardBroker Custom Resource Definition
//!
//! A DataguardBroker groups one primary SingleInstanceDatabase and any
//! number of standbys into a broker configuration and exposes the current
//! primary behind one stable service.

use std::collections::BTreeMap;
use std::str::FromStr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, HealthStatus};
use crate::kube_utils::StatusResource;

/// Lifecycle phase of a DataguardBroker
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BrokerPhase {
    /// Waiting for member databases
    #[default]
    Pending,
    /// Creating the configuration or adding members
    Configuring,
    /// Role change in progress
    Switching,
    /// All members configured with full-mesh failover targets
    Ready,
    /// Permanent failure until the spec or environment changes
    Failed,
    /// Finalizer cleanup in progress
    Deleting,
}

impl std::fmt::Display for BrokerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Configuring => write!(f, "Configuring"),
            Self::Switching => write!(f, "Switching"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Redo transport protection mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionMode {
    /// Asynchronous redo transport
    MaxPerformance,
    /// Synchronous redo transport
    MaxAvailability,
}

impl ProtectionMode {
    /// LogXptMode property value for members
    pub fn log_xpt_mode(&self) -> &'static str {
        match self {
            Self::MaxPerformance => "ASYNC",
            Self::MaxAvailability => "SYNC",
        }
    }
}

impl std::fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxPerformance => write!(f, "MaxPerformance"),
            Self::MaxAvailability => write!(f, "MaxAvailability"),
        }
    }
}

impl FromStr for ProtectionMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MaxPerformance" => Ok(Self::MaxPerformance),
            "MaxAvailability" => Ok(Self::MaxAvailability),
            other => Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.protectionMode",
                format!("unsupported protection mode '{other}', expected MaxPerformance or MaxAvailability"),
            )),
        }
    }
}

fn default_protection_mode() -> String {
    ProtectionMode::MaxPerformance.to_string()
}

/// Specification for a DataguardBroker
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.oradb.io",
    version = "v1alpha1",
    kind = "DataguardBroker",
    plural = "dataguardbrokers",
    shortname = "dgb",
    namespaced,
    status = "DataguardBrokerStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Primary","type":"string","jsonPath":".status.primaryDatabase"}"#,
    printcolumn = r#"{"name":"Standbys","type":"string","jsonPath":".status.standbyDatabases"}"#,
    printcolumn = r#"{"name":"Protection","type":"string","jsonPath":".status.protectionMode"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataguardBrokerSpec {
    /// SingleInstanceDatabase that starts out as primary
    pub primary_database_ref: String,

    /// SingleInstanceDatabases to add as standbys
    #[serde(default)]
    pub standby_database_refs: Vec<String>,

    /// MaxPerformance or MaxAvailability
    #[serde(default = "default_protection_mode")]
    pub protection_mode: String,

    /// SID that should be primary; triggers a switchover when it is not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_as_primary_database: Option<String>,

    /// Expose through a LoadBalancer service instead of NodePort
    #[serde(default)]
    pub load_balancer: bool,

    /// Annotations copied onto the service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_annotations: BTreeMap<String, String>,

    /// Enable fast-start failover once targets are set
    #[serde(default)]
    pub fast_start_failover: bool,
}

impl DataguardBrokerSpec {
    /// Parsed protection mode
    pub fn protection_mode(&self) -> Result<ProtectionMode, crate::Error> {
        self.protection_mode.parse()
    }

    /// Validate the specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.primary_database_ref.is_empty() {
            return Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.primaryDatabaseRef",
                "primary database reference cannot be empty",
            ));
        }
        if self
            .standby_database_refs
            .iter()
            .any(|s| s == &self.primary_database_ref)
        {
            return Err(crate::Error::validation_for_field(
                self.primary_database_ref.clone(),
                "spec.standbyDatabaseRefs",
                "primary database cannot also be listed as a standby",
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some(dup) = self
            .standby_database_refs
            .iter()
            .find(|s| !seen.insert(s.as_str()))
        {
            return Err(crate::Error::validation_for_field(
                dup.clone(),
                "spec.standbyDatabaseRefs",
                "standby listed more than once",
            ));
        }
        self.protection_mode()?;
        Ok(())
    }
}

/// Status of a DataguardBroker
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataguardBrokerStatus {
    /// Current phase
    #[serde(default)]
    pub phase: BrokerPhase,

    /// Coarse health
    #[serde(default)]
    pub status: HealthStatus,

    /// Resource name of the current primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_database_ref: Option<String>,

    /// SID of the current primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_database: Option<String>,

    /// Comma-separated SIDs of the standbys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby_databases: Option<String>,

    /// Members as reported by the broker, SID to resource name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub databases_in_dataguard_config: BTreeMap<String, String>,

    /// Protection mode applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection_mode: Option<String>,

    /// In-cluster connect string of the primary service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_connect_string: Option<String>,

    /// External connect string of the primary service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_connect_string: Option<String>,

    /// Fast-start failover enabled
    #[serde(default)]
    pub fast_start_failover: bool,

    /// Fingerprint of the last spec that reached Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_spec_hash: Option<String>,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Reconcile conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl StatusResource for DataguardBroker {
    type Status = DataguardBrokerStatus;

    fn current_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorClass;

    fn spec() -> DataguardBrokerSpec {
        DataguardBrokerSpec {
            primary_database_ref: "sidb-primary".to_string(),
            standby_database_refs: vec!["sidb-standby1".to_string()],
            protection_mode: "MaxPerformance".to_string(),
            set_as_primary_database: None,
            load_balancer: false,
            service_annotations: BTreeMap::new(),
            fast_start_failover: false,
        }
    }

    #[test]
    fn protection_modes_map_to_transport() {
        assert_eq!(ProtectionMode::MaxPerformance.log_xpt_mode(), "ASYNC");
        assert_eq!(ProtectionMode::MaxAvailability.log_xpt_mode(), "SYNC");
    }

    #[test]
    fn bad_protection_mode_is_a_spec_error() {
        let mut s = spec();
        s.protection_mode = "MaxProtection".to_string();
        let err = s.validate().unwrap_err();
        assert_eq!(err.class(), ErrorClass::Spec);
        assert!(err.to_string().contains("MaxProtection"));
    }

    #[test]
    fn primary_cannot_be_its_own_standby() {
        let mut s = spec();
        s.standby_database_refs.push("sidb-primary".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn duplicate_standbys_rejected() {
        let mut s = spec();
        s.standby_database_refs.push("sidb-standby1".to_string());
        assert!(s.validate().is_err());
    }

    #[test]
    fn defaults_to_max_performance() {
        let s: DataguardBrokerSpec =
            serde_json::from_value(serde_json::json!({"primaryDatabaseRef": "p"})).unwrap();
        assert_eq!(s.protection_mode().ok(), Some(ProtectionMode::MaxPerformance));
        assert!(s.standby_database_refs.is_empty());
    }
}
