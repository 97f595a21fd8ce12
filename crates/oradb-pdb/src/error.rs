//! Gateway error types

use thiserror::Error;

/// Service name used in external-service errors
pub const GATEWAY_SERVICE: &str = "gateway";

/// Failures talking to the data-access gateway
#[derive(Debug, Error)]
pub enum PdbError {
    /// Non-200 response
    #[error("gateway returned HTTP {status} for {pdb}: {message}")]
    Http {
        /// PDB name
        pdb: String,
        /// HTTP status
        status: u16,
        /// Message from the gateway error body, or the raw body
        message: String,
    },

    /// 200 response with `errorDetails` on one of its items
    #[error("gateway reported a database error for {pdb}: {details}")]
    Database {
        /// PDB name
        pdb: String,
        /// Vendor error code, when the gateway sent one
        code: Option<i64>,
        /// First error detail reported
        details: String,
    },

    /// The request never got a response
    #[error("gateway unreachable for {pdb}: {message}")]
    Unreachable {
        /// PDB name
        pdb: String,
        /// Transport failure
        message: String,
    },

    /// The response body was not what the gateway documents
    #[error("gateway response for {pdb} could not be decoded: {message}")]
    Decode {
        /// PDB name
        pdb: String,
        /// Parse failure
        message: String,
    },

    /// The client certificate or CA bundle could not be loaded
    #[error("client certificate for {pdb} is invalid: {message}")]
    InvalidTls {
        /// PDB name
        pdb: String,
        /// What was wrong
        message: String,
    },
}

impl PdbError {
    /// HTTP status of a non-200 response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<PdbError> for oradb_common::Error {
    fn from(e: PdbError) -> Self {
        match &e {
            PdbError::Http { pdb, status, .. } => oradb_common::Error::external_with_status(
                pdb.clone(),
                GATEWAY_SERVICE,
                *status,
                e.to_string(),
            ),
            PdbError::Database { pdb, .. }
            | PdbError::Unreachable { pdb, .. }
            | PdbError::Decode { pdb, .. } => {
                oradb_common::Error::external(pdb.clone(), GATEWAY_SERVICE, e.to_string())
            }
            PdbError::InvalidTls { pdb, .. } => {
                oradb_common::Error::validation_for_field(pdb.clone(), "spec.tlsSecret", e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oradb_common::ErrorClass;
    use rstest::rstest;

    #[rstest]
    #[case(
        PdbError::Http { pdb: "pdb1".into(), status: 500, message: "boom".into() },
        ErrorClass::ExternalService
    )]
    #[case(
        PdbError::Database { pdb: "pdb1".into(), code: Some(65012), details: "ORA-65012".into() },
        ErrorClass::ExternalService
    )]
    #[case(
        PdbError::Unreachable { pdb: "pdb1".into(), message: "refused".into() },
        ErrorClass::ExternalService
    )]
    #[case(
        PdbError::InvalidTls { pdb: "pdb1".into(), message: "no key".into() },
        ErrorClass::Spec
    )]
    fn classifies(#[case] error: PdbError, #[case] class: ErrorClass) {
        let e: oradb_common::Error = error.into();
        assert_eq!(e.class(), class);
    }

    #[test]
    fn http_errors_keep_their_status() {
        let e = PdbError::Http {
            pdb: "pdb1".into(),
            status: 404,
            message: "not found".into(),
        };
        assert_eq!(e.status(), Some(404));
        assert!(e.to_string().contains("HTTP 404"));
    }
}
