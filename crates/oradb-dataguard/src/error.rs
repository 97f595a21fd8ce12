//! Broker-specific error types

use thiserror::Error;

/// Failures specific to the DataguardBroker controller
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A switchover target is not part of the broker configuration
    #[error("database {sid} is not a member of the broker configuration")]
    UnknownMember {
        /// Requested SID
        sid: String,
    },

    /// The broker reports zero or several primaries
    #[error("broker reports {count} primary databases, expected exactly one")]
    PrimaryCount {
        /// Number of members with role PRIMARY
        count: usize,
    },

    /// Failover targets read back differ from the ones just written
    #[error("failover targets of {sid} are '{found}', expected '{expected}'")]
    TargetMismatch {
        /// Member whose property was checked
        sid: String,
        /// Comma-joined targets written
        expected: String,
        /// Comma-joined targets read back
        found: String,
    },

    /// A referenced database is already configured by another broker
    #[error("database {database} already belongs to DataguardBroker {broker}")]
    MemberOwned {
        /// SingleInstanceDatabase name
        database: String,
        /// Broker that owns it
        broker: String,
    },

    /// Two referenced databases share one SID
    #[error("SID {sid} is used by both {first} and {second}")]
    DuplicateSid {
        /// Shared SID
        sid: String,
        /// First database
        first: String,
        /// Second database
        second: String,
    },
}

impl From<BrokerError> for oradb_common::Error {
    fn from(e: BrokerError) -> Self {
        match &e {
            BrokerError::UnknownMember { sid } => {
                oradb_common::Error::not_ready(sid.clone(), e.to_string())
            }
            BrokerError::PrimaryCount { .. } => {
                oradb_common::Error::not_ready("broker", e.to_string())
            }
            BrokerError::TargetMismatch { sid, .. } => {
                oradb_common::Error::not_ready(sid.clone(), e.to_string())
            }
            BrokerError::MemberOwned { database, .. } => oradb_common::Error::validation_for_field(
                database.clone(),
                "spec.standbyDatabaseRefs",
                e.to_string(),
            ),
            BrokerError::DuplicateSid { sid, .. } => oradb_common::Error::validation_for_field(
                sid.clone(),
                "spec.standbyDatabaseRefs",
                e.to_string(),
            ),
        }
    }
}
