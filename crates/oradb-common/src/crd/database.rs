//! SingleInstanceDatabase Custom Resource Definition
//!
//! A SingleInstanceDatabase is one database (SID) served by one or more
//! pods sharing a volume. Only one pod opens the database at a time; that
//! pod is reported as `status.readyPod`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, DatabaseRole, HealthStatus};
use crate::kube_utils::StatusResource;

/// Lifecycle phase of a SingleInstanceDatabase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DatabasePhase {
    /// Checking spec, immutable fields and the admin secret
    #[default]
    Validating,
    /// Synchronizing service, volume claim and pods
    Provisioning,
    /// Waiting for one pod to report a ready container
    WaitingReady,
    /// Running post-ready configuration in the database
    Configuring,
    /// Converged; only status is refreshed
    Ready,
    /// Permanent failure until the spec or environment changes
    Failed,
    /// Finalizer cleanup in progress
    Deleting,
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validating => write!(f, "Validating"),
            Self::Provisioning => write!(f, "Provisioning"),
            Self::WaitingReady => write!(f, "WaitingReady"),
            Self::Configuring => write!(f, "Configuring"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Database edition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    /// Enterprise Edition
    #[default]
    Enterprise,
    /// Standard Edition 2
    Standard,
    /// Express Edition
    Express,
    /// Free
    Free,
}

impl Edition {
    /// Express and Free images only support one pod
    pub fn single_replica_only(&self) -> bool {
        matches!(self, Self::Express | Self::Free)
    }
}

impl std::fmt::Display for Edition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enterprise => write!(f, "enterprise"),
            Self::Standard => write!(f, "standard"),
            Self::Express => write!(f, "express"),
            Self::Free => write!(f, "free"),
        }
    }
}

/// Container image the database pods run
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image reference
    pub pull_from: String,

    /// Release version label for the image; pods are labeled with it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Name of an image pull secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secrets: Option<String>,

    /// Image already contains datafiles
    #[serde(default)]
    pub prebuilt_db: bool,
}

impl ImageSpec {
    /// Version label value, falling back to the image tag
    pub fn version_label(&self) -> String {
        if let Some(v) = self.version.as_deref().filter(|v| !v.is_empty()) {
            return v.to_string();
        }
        self.pull_from
            .rsplit_once(':')
            .filter(|(_, tag)| !tag.contains('/'))
            .map(|(_, tag)| tag.to_string())
            .unwrap_or_else(|| "latest".to_string())
    }
}

fn default_secret_key() -> String {
    "oracle_pwd".to_string()
}

/// Where the SYS/SYSTEM/PDBADMIN password lives
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminPasswordSpec {
    /// Secret name
    pub secret_name: String,

    /// Key within the secret
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    /// Keep the secret when the database is deleted
    #[serde(default)]
    pub keep_secret: bool,
}

fn default_access_mode() -> String {
    "ReadWriteOnce".to_string()
}

/// Datafile volume
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Requested size (e.g., "50Gi")
    pub size: String,

    /// Storage class; cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// PVC access mode. ReadWriteMany is required for more than one replica.
    #[serde(default = "default_access_mode")]
    pub access_mode: String,
}

/// Initialization parameters converged after the database is up
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitParams {
    /// SGA_TARGET in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sga_target: Option<i64>,
    /// PGA_AGGREGATE_TARGET in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pga_aggregate_target: Option<i64>,
    /// CPU_COUNT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<i64>,
    /// PROCESSES (needs a restart to take effect)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<i64>,
}

fn default_replicas() -> i32 {
    1
}

/// Specification for a SingleInstanceDatabase
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.oradb.io",
    version = "v1alpha1",
    kind = "SingleInstanceDatabase",
    plural = "singleinstancedatabases",
    shortname = "sidb",
    namespaced,
    status = "SingleInstanceDatabaseStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".status.role"}"#,
    printcolumn = r#"{"name":"Connect","type":"string","jsonPath":".status.connectString"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SingleInstanceDatabaseSpec {
    /// Oracle SID, 1-12 alphanumeric characters starting with a letter
    pub sid: String,

    /// Database edition
    #[serde(default)]
    pub edition: Edition,

    /// Character set; image default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,

    /// Initial pluggable database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdb_name: Option<String>,

    /// Number of pods; one opens the database, the rest stand by on the shared volume
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image
    pub image: ImageSpec,

    /// Admin password secret
    pub admin_password: AdminPasswordSpec,

    /// Datafile volume; ephemeral storage when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceSpec>,

    /// Expose through a LoadBalancer service instead of NodePort
    #[serde(default)]
    pub load_balancer: bool,

    /// Annotations copied onto the service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_annotations: BTreeMap<String, String>,

    /// Node selector for the pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Desired flashback setting; left untouched when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_back: Option<bool>,

    /// Desired archivelog mode; left untouched when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_log: Option<bool>,

    /// Desired force logging; left untouched when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_log: Option<bool>,

    /// Initialization parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_params: Option<InitParams>,
}

impl SingleInstanceDatabaseSpec {
    /// SID as the database reports it
    pub fn sid_upper(&self) -> String {
        self.sid.to_ascii_uppercase()
    }

    /// Validate the specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        let sid = &self.sid;
        if sid.is_empty() || sid.len() > 12 {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.sid",
                "sid must be 1-12 characters",
            ));
        }
        if !sid.chars().all(|c| c.is_ascii_alphanumeric())
            || !sid.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.sid",
                "sid must be alphanumeric and start with a letter",
            ));
        }
        if self.replicas < 1 {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.replicas",
                "replicas must be at least 1",
            ));
        }
        if self.edition.single_replica_only() && self.replicas > 1 {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.replicas",
                format!("{} edition supports only one replica", self.edition),
            ));
        }
        if self.replicas > 1 {
            let rwx = self
                .persistence
                .as_ref()
                .is_some_and(|p| p.access_mode == "ReadWriteMany");
            if !rwx {
                return Err(crate::Error::validation_for_field(
                    sid.clone(),
                    "spec.persistence.accessMode",
                    "more than one replica requires ReadWriteMany persistence",
                ));
            }
        }
        if self.image.pull_from.is_empty() {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.image.pullFrom",
                "image cannot be empty",
            ));
        }
        if self.admin_password.secret_name.is_empty() {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.adminPassword.secretName",
                "admin password secret name cannot be empty",
            ));
        }
        if self.flash_back == Some(true) && self.archive_log == Some(false) {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.flashBack",
                "flashback requires archivelog mode",
            ));
        }
        if self.edition == Edition::Express && self.init_params.is_some() {
            return Err(crate::Error::validation_for_field(
                sid.clone(),
                "spec.initParams",
                "init params are not supported on express edition",
            ));
        }
        Ok(())
    }
}

/// Status of a SingleInstanceDatabase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SingleInstanceDatabaseStatus {
    /// Current phase
    #[serde(default)]
    pub phase: DatabasePhase,

    /// Coarse health
    #[serde(default)]
    pub status: HealthStatus,

    /// SID as created; immutable afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Edition as created; immutable afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<Edition>,

    /// Character set as created; immutable afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,

    /// PDB name as created; immutable afterwards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdb_name: Option<String>,

    /// Role reported by the database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<DatabaseRole>,

    /// Observed replica count
    #[serde(default)]
    pub replicas: i32,

    /// Pod currently serving the database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_pod: Option<String>,

    /// External connect string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_string: Option<String>,

    /// In-cluster connect string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_connect_string: Option<String>,

    /// Image version the datafiles were last patched to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_update: Option<String>,

    /// Datafiles exist on the volume
    #[serde(default)]
    pub datafiles_created: bool,

    /// Datapatch ran for `release_update`
    #[serde(default)]
    pub datafiles_patched: bool,

    /// Observed flashback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_back: Option<bool>,

    /// Observed archivelog mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_log: Option<bool>,

    /// Observed force logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_log: Option<bool>,

    /// Observed init params
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_params: Option<InitParams>,

    /// DataguardBroker that has this database in its configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dg_broker: Option<String>,

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

impl StatusResource for SingleInstanceDatabase {
    type Status = SingleInstanceDatabaseStatus;

    fn current_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_spec() -> SingleInstanceDatabaseSpec {
        SingleInstanceDatabaseSpec {
            sid: "ORCL1".to_string(),
            edition: Edition::Enterprise,
            charset: None,
            pdb_name: Some("ORCLPDB1".to_string()),
            replicas: 1,
            image: ImageSpec {
                pull_from: "container-registry.example.com/database/enterprise:21.3.0.0".to_string(),
                version: None,
                pull_secrets: None,
                prebuilt_db: false,
            },
            admin_password: AdminPasswordSpec {
                secret_name: "db-admin-secret".to_string(),
                secret_key: default_secret_key(),
                keep_secret: false,
            },
            persistence: None,
            load_balancer: false,
            service_annotations: BTreeMap::new(),
            node_selector: BTreeMap::new(),
            flash_back: None,
            archive_log: None,
            force_log: None,
            init_params: None,
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(sample_spec().validate().is_ok());
    }

    #[test]
    fn sid_must_be_short_and_alphanumeric() {
        let mut spec = sample_spec();
        spec.sid = "THISSIDISTOOLONG".to_string();
        assert!(spec.validate().is_err());

        spec.sid = "1ORCL".to_string();
        assert!(spec.validate().is_err());

        spec.sid = "OR_CL".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn express_edition_is_single_replica() {
        let mut spec = sample_spec();
        spec.edition = Edition::Express;
        spec.replicas = 2;
        spec.persistence = Some(PersistenceSpec {
            size: "10Gi".to_string(),
            storage_class: None,
            access_mode: "ReadWriteMany".to_string(),
        });
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("only one replica"));
    }

    #[test]
    fn multiple_replicas_need_shared_volume() {
        let mut spec = sample_spec();
        spec.replicas = 3;
        assert!(spec.validate().is_err());
        spec.persistence = Some(PersistenceSpec {
            size: "10Gi".to_string(),
            storage_class: None,
            access_mode: "ReadWriteMany".to_string(),
        });
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn flashback_requires_archivelog() {
        let mut spec = sample_spec();
        spec.flash_back = Some(true);
        spec.archive_log = Some(false);
        assert!(spec.validate().is_err());
        spec.archive_log = Some(true);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn version_label_falls_back_to_tag() {
        let mut image = sample_spec().image;
        assert_eq!(image.version_label(), "21.3.0.0");
        image.version = Some("21.7".to_string());
        assert_eq!(image.version_label(), "21.7");
        image.version = None;
        image.pull_from = "registry:5000/db".to_string();
        assert_eq!(image.version_label(), "latest");
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: SingleInstanceDatabaseSpec = serde_json::from_value(serde_json::json!({
            "sid": "orcl1",
            "image": {"pullFrom": "db:19.3"},
            "adminPassword": {"secretName": "admin"}
        }))
        .unwrap();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.edition, Edition::Enterprise);
        assert_eq!(spec.admin_password.secret_key, "oracle_pwd");
        assert_eq!(spec.sid_upper(), "ORCL1");
    }
}
