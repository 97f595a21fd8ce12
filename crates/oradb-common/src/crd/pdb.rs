//! PluggableDatabase Custom Resource Definition
//!
//! Lifecycle verbs are executed through the data-access gateway that
//! fronts a container database. The gateway is reached at
//! `<cdbResName>-ords:<gatewayPort>`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SecretKeyRef};
use crate::kube_utils::StatusResource;

/// Lifecycle phase of a PluggableDatabase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PdbPhase {
    /// Not yet submitted
    #[default]
    Pending,
    /// Create request in flight
    Creating,
    /// Clone request in flight
    Cloning,
    /// Plug request in flight
    Plugging,
    /// Unplug request in flight
    Unplugging,
    /// Open-mode change in flight
    Modifying,
    /// Drop request in flight
    Deleting,
    /// Last requested action completed
    Ready,
    /// Gateway rejected the last action
    Failed,
}

impl std::fmt::Display for PdbPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Creating => write!(f, "Creating"),
            Self::Cloning => write!(f, "Cloning"),
            Self::Plugging => write!(f, "Plugging"),
            Self::Unplugging => write!(f, "Unplugging"),
            Self::Modifying => write!(f, "Modifying"),
            Self::Deleting => write!(f, "Deleting"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Requested lifecycle action
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PdbAction {
    /// Create from seed
    Create,
    /// Clone from `srcPdbName`
    Clone,
    /// Plug in from an XML manifest
    Plug,
    /// Unplug to an XML manifest
    Unplug,
    /// Change open mode
    Modify,
    /// Drop
    Delete,
}

impl PdbAction {
    /// Phase shown while the action is in flight
    pub fn in_flight_phase(&self) -> PdbPhase {
        match self {
            Self::Create => PdbPhase::Creating,
            Self::Clone => PdbPhase::Cloning,
            Self::Plug => PdbPhase::Plugging,
            Self::Unplug => PdbPhase::Unplugging,
            Self::Modify => PdbPhase::Modifying,
            Self::Delete => PdbPhase::Deleting,
        }
    }

    /// Gateway `method` field value
    pub fn method(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Clone => "CLONE",
            Self::Plug => "PLUG",
            Self::Unplug => "UNPLUG",
            Self::Modify => "MODIFY",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for PdbAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Clone => write!(f, "Clone"),
            Self::Plug => write!(f, "Plug"),
            Self::Unplug => write!(f, "Unplug"),
            Self::Modify => write!(f, "Modify"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// Target open state for Modify
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PdbState {
    /// Open the PDB
    Open,
    /// Close the PDB
    Close,
}

impl std::fmt::Display for PdbState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// What happens to datafiles on drop
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DropAction {
    /// Keep datafiles
    #[default]
    Keep,
    /// Drop including datafiles
    Including,
}

impl std::fmt::Display for DropAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keep => write!(f, "KEEP"),
            Self::Including => write!(f, "INCLUDING"),
        }
    }
}

fn default_cert_key() -> String {
    "tls.crt".to_string()
}

fn default_key_key() -> String {
    "tls.key".to_string()
}

fn default_ca_key() -> String {
    "ca.crt".to_string()
}

/// Client certificate used for mutual TLS with the gateway
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecretRef {
    /// Secret holding the client certificate, key and CA bundle
    pub secret_name: String,
    /// Key of the PEM client certificate
    #[serde(default = "default_cert_key")]
    pub cert_key: String,
    /// Key of the PEM private key
    #[serde(default = "default_key_key")]
    pub key_key: String,
    /// Key of the PEM CA bundle
    #[serde(default = "default_ca_key")]
    pub ca_key: String,
}

fn default_gateway_port() -> u16 {
    8888
}

/// Specification for a PluggableDatabase
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "database.oradb.io",
    version = "v1alpha1",
    kind = "PluggableDatabase",
    plural = "pluggabledatabases",
    shortname = "pdb",
    namespaced,
    status = "PluggableDatabaseStatus",
    printcolumn = r#"{"name":"PDB","type":"string","jsonPath":".spec.pdbName"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Open","type":"string","jsonPath":".status.openMode"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PluggableDatabaseSpec {
    /// Resource name prefix of the gateway service
    pub cdb_res_name: String,

    /// Gateway port
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    /// PDB name
    pub pdb_name: String,

    /// Source PDB for Clone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_pdb_name: Option<String>,

    /// Requested action
    pub action: PdbAction,

    /// PDB admin user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_name: Option<SecretKeyRef>,

    /// PDB admin password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_pwd: Option<SecretKeyRef>,

    /// Gateway basic-auth user
    pub web_server_user: SecretKeyRef,

    /// Gateway basic-auth password
    pub web_server_pwd: SecretKeyRef,

    /// Client certificate for mutual TLS; plain HTTP when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret: Option<TlsSecretRef>,

    /// FILE_NAME_CONVERT clause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name_conversions: Option<String>,

    /// Storage limit, e.g. "1G"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<String>,

    /// Temp tablespace size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_size: Option<String>,

    /// Manifest path for Plug and Unplug
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_file_name: Option<String>,

    /// Target state for Modify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdb_state: Option<PdbState>,

    /// Modify option, e.g. "IMMEDIATE" or "READ WRITE"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_option: Option<String>,

    /// Datafile handling on drop
    #[serde(default)]
    pub drop_action: DropAction,

    /// Reuse an existing temp file
    #[serde(default)]
    pub reuse_temp_file: bool,

    /// No storage limit
    #[serde(default)]
    pub unlimited_storage: bool,

    /// Plug as a clone
    #[serde(default)]
    pub as_clone: bool,

    /// Ask the gateway to return the generated script
    #[serde(default)]
    pub get_script: bool,
}

impl PluggableDatabaseSpec {
    /// Validate action-specific required fields
    pub fn validate(&self) -> Result<(), crate::Error> {
        let missing = |field: &str, msg: &str| {
            Err(crate::Error::validation_for_field(
                self.pdb_name.clone(),
                field,
                msg,
            ))
        };
        if self.pdb_name.is_empty() {
            return missing("spec.pdbName", "pdb name cannot be empty");
        }
        if self.cdb_res_name.is_empty() {
            return missing("spec.cdbResName", "gateway resource name cannot be empty");
        }
        match self.action {
            PdbAction::Create => {
                if self.admin_name.is_none() || self.admin_pwd.is_none() {
                    return missing("spec.adminName", "create requires admin credentials");
                }
            }
            PdbAction::Clone => {
                if self.src_pdb_name.as_deref().unwrap_or_default().is_empty() {
                    return missing("spec.srcPdbName", "clone requires a source pdb");
                }
            }
            PdbAction::Plug | PdbAction::Unplug => {
                if self.xml_file_name.as_deref().unwrap_or_default().is_empty() {
                    return missing("spec.xmlFileName", "plug and unplug require an xml file");
                }
            }
            PdbAction::Modify => {
                if self.pdb_state.is_none() {
                    return missing("spec.pdbState", "modify requires a target state");
                }
            }
            PdbAction::Delete => {}
        }
        Ok(())
    }
}

/// Status of a PluggableDatabase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluggableDatabaseStatus {
    /// Current phase
    #[serde(default)]
    pub phase: PdbPhase,

    /// Last action applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Open mode reported by the gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_mode: Option<String>,

    /// Last modify option applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modify_option: Option<String>,

    /// Storage limit applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<String>,

    /// Connect string of the PDB service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_string: Option<String>,

    /// Fingerprint of the last spec the gateway accepted
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

impl StatusResource for PluggableDatabase {
    type Status = PluggableDatabaseStatus;

    fn current_status(&self) -> Option<&Self::Status> {
        self.status.as_ref()
    }
}
