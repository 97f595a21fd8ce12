//! Database controller errors

use thiserror::Error;

/// Failures specific to the SingleInstanceDatabase controller
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A field that is fixed at creation was changed
    #[error("{field} cannot be changed from '{from}' to '{to}' after creation")]
    ImmutableField {
        /// Field path, e.g. `spec.sid`
        field: &'static str,
        /// Value recorded in status
        from: String,
        /// Value now requested
        to: String,
    },

    /// A pod created from the requested image cannot pull it
    #[error("pod {pod} cannot pull image {image}: {reason}")]
    ImagePull {
        /// Pod name
        pod: String,
        /// Requested image
        image: String,
        /// Waiting reason reported by the kubelet
        reason: String,
    },

    /// The existing claim cannot be reused for the requested persistence
    #[error("volume {claim} cannot change {what}")]
    VolumeMismatch {
        /// PersistentVolumeClaim name
        claim: String,
        /// Attribute that differs
        what: &'static str,
    },

    /// The admin password does not log in as SYS
    #[error("admin password for {sid} was rejected by the database")]
    AdminPasswordRejected {
        /// Database SID
        sid: String,
    },
}

impl From<DatabaseError> for oradb_common::Error {
    fn from(e: DatabaseError) -> Self {
        match &e {
            DatabaseError::ImmutableField { field, .. } => {
                oradb_common::Error::validation_for_field(
                    oradb_common::error::UNKNOWN_CONTEXT,
                    *field,
                    e.to_string(),
                )
            }
            DatabaseError::ImagePull { pod, .. } => {
                oradb_common::Error::validation_for_field(pod.clone(), "spec.image", e.to_string())
            }
            DatabaseError::VolumeMismatch { claim, .. } => oradb_common::Error::validation_for_field(
                claim.clone(),
                "spec.persistence",
                e.to_string(),
            ),
            DatabaseError::AdminPasswordRejected { sid } => {
                oradb_common::Error::domain(sid.clone(), "ORA-01017", e.to_string(), false)
            }
        }
    }
}
