//! Shared types used across oradb CRDs

use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ReconcileComplete)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the resource this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Attach the generation this condition describes
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// True when both conditions say the same thing, ignoring the timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Reference to a single key inside a Secret in the resource's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Name of the Secret
    pub secret_name: String,
    /// Key within the Secret's data
    pub secret_key: String,
}

/// Role a database plays in a replication group, as reported by the database itself
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatabaseRole {
    /// Read-write primary
    Primary,
    /// Redo-apply standby
    PhysicalStandby,
    /// SQL-apply standby
    LogicalStandby,
    /// Temporarily opened read-write standby
    SnapshotStandby,
    /// Redo relay without datafiles
    FarSync,
    /// Role could not be determined
    Unknown,
}

impl DatabaseRole {
    /// True for every standby flavor
    pub fn is_standby(&self) -> bool {
        matches!(
            self,
            Self::PhysicalStandby | Self::LogicalStandby | Self::SnapshotStandby
        )
    }
}

impl std::fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "PRIMARY"),
            Self::PhysicalStandby => write!(f, "PHYSICAL_STANDBY"),
            Self::LogicalStandby => write!(f, "LOGICAL_STANDBY"),
            Self::SnapshotStandby => write!(f, "SNAPSHOT_STANDBY"),
            Self::FarSync => write!(f, "FAR_SYNC"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for DatabaseRole {
    type Err = std::convert::Infallible;

    /// Accepts both the `V$DATABASE` spelling ("PHYSICAL STANDBY") and the
    /// underscore spelling used in broker rows. Anything else is `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(' ', "_");
        Ok(match normalized.as_str() {
            "PRIMARY" => Self::Primary,
            "PHYSICAL_STANDBY" => Self::PhysicalStandby,
            "LOGICAL_STANDBY" => Self::LogicalStandby,
            "SNAPSHOT_STANDBY" => Self::SnapshotStandby,
            "FAR_SYNC" => Self::FarSync,
            _ => Self::Unknown,
        })
    }
}

/// Coarse health reported in `status.status`
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum HealthStatus {
    /// Waiting on a dependency or not yet started
    #[default]
    Pending,
    /// Datafiles are being created
    Creating,
    /// Instance exists but is not serving
    Unhealthy,
    /// Datapatch running after an image change
    Patching,
    /// Applying configuration or membership changes
    Updating,
    /// Serving and converged
    Healthy,
    /// Failed permanently until the spec or environment changes
    Error,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Creating => write!(f, "Creating"),
            Self::Unhealthy => write!(f, "Unhealthy"),
            Self::Patching => write!(f, "Patching"),
            Self::Updating => write!(f, "Updating"),
            Self::Healthy => write!(f, "Healthy"),
            Self::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_both_spellings() {
        assert_eq!(
            "PHYSICAL STANDBY".parse::<DatabaseRole>().ok(),
            Some(DatabaseRole::PhysicalStandby)
        );
        assert_eq!(
            "physical_standby".parse::<DatabaseRole>().ok(),
            Some(DatabaseRole::PhysicalStandby)
        );
        assert_eq!("PRIMARY".parse::<DatabaseRole>().ok(), Some(DatabaseRole::Primary));
        assert_eq!("garbage".parse::<DatabaseRole>().ok(), Some(DatabaseRole::Unknown));
    }

    #[test]
    fn role_serializes_with_underscores() {
        let json = serde_json::to_string(&DatabaseRole::PhysicalStandby).unwrap();
        assert_eq!(json, "\"PHYSICAL_STANDBY\"");
        assert!(DatabaseRole::PhysicalStandby.is_standby());
        assert!(!DatabaseRole::Primary.is_standby());
    }

    #[test]
    fn same_state_ignores_timestamp() {
        let a = Condition::new("ReconcileComplete", ConditionStatus::True, "Done", "ok");
        let mut b = a.clone();
        b.last_transition_time = a.last_transition_time - chrono::Duration::hours(1);
        assert!(a.same_state(&b));
        b.message = "changed".to_string();
        assert!(!a.same_state(&b));
    }

    #[test]
    fn condition_serializes_camel_case() {
        let c = Condition::new("ReconcileQueued", ConditionStatus::False, "Queued", "waiting")
            .with_observed_generation(Some(3));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "ReconcileQueued");
        assert_eq!(json["observedGeneration"], 3);
        assert!(json.get("lastTransitionTime").is_some());
    }
}
