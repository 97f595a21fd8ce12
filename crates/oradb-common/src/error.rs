//! Error types for the oradb operator
//!
//! Errors are structured with fields to aid debugging in production. Every
//! variant maps onto one [`ErrorClass`], which is what the requeue policy
//! uses to decide between "stay and retry" and "fail the resource".

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Coarse classification of an error, driving phase and requeue decisions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// API server hiccups, dependencies not ready yet. Requeue, keep phase.
    TransientInfra,
    /// Cloud or gateway call failed. Resource goes to Failed.
    ExternalService,
    /// Vendor error code found in command output that is not retryable.
    Domain,
    /// A referenced object (secret, member database) does not exist yet.
    NotFound,
    /// The declared spec is invalid and needs a user edit.
    Spec,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientInfra => write!(f, "TransientInfra"),
            Self::ExternalService => write!(f, "ExternalService"),
            Self::Domain => write!(f, "Domain"),
            Self::NotFound => write!(f, "NotFound"),
            Self::Spec => write!(f, "Spec"),
        }
    }
}

/// Main error type for oradb operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.protectionMode")
        field: Option<String>,
    },

    /// A referenced object does not exist (yet)
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object (Secret, SingleInstanceDatabase, ...)
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// Dependency exists but is not ready for the requested operation
    #[error("{resource} waiting: {message}")]
    NotReady {
        /// Resource that is waiting
        resource: String,
        /// What it is waiting for
        message: String,
    },

    /// Command could not be delivered to or run inside an instance
    #[error("exec transport error on pod {pod}: {message}")]
    Transport {
        /// Pod the command targeted
        pod: String,
        /// Transport failure description
        message: String,
    },

    /// Vendor error code found in otherwise successful command output
    #[error("database error {code} on {target}: {message}")]
    Domain {
        /// Where the command ran (pod or SID)
        target: String,
        /// Vendor error code, e.g. "ORA-16525"
        code: String,
        /// Offending output line
        message: String,
        /// Whether the code denotes a transient condition
        transient: bool,
    },

    /// Call to an external service (gateway, cloud API) failed
    #[error("external service error [{service}] for {resource}: {message}")]
    ExternalService {
        /// Resource being reconciled
        resource: String,
        /// Service name (e.g. "gateway")
        service: String,
        /// Description of what failed
        message: String,
        /// HTTP status when the failure came from a response
        status: Option<u16>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "finalizer")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error for a referenced object
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-ready error
    pub fn not_ready(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NotReady {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create an exec transport error
    pub fn transport(pod: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            pod: pod.into(),
            message: msg.into(),
        }
    }

    /// Create a domain error from a vendor code
    pub fn domain(
        target: impl Into<String>,
        code: impl Into<String>,
        msg: impl Into<String>,
        transient: bool,
    ) -> Self {
        Self::Domain {
            target: target.into(),
            code: code.into(),
            message: msg.into(),
            transient,
        }
    }

    /// Create an external service error without an HTTP status
    pub fn external(
        resource: impl Into<String>,
        service: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ExternalService {
            resource: resource.into(),
            service: service.into(),
            message: msg.into(),
            status: None,
        }
    }

    /// Create an external service error carrying the HTTP status
    pub fn external_with_status(
        resource: impl Into<String>,
        service: impl Into<String>,
        status: u16,
        msg: impl Into<String>,
    ) -> Self {
        Self::ExternalService {
            resource: resource.into(),
            service: service.into(),
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify this error for phase and requeue decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 404 => ErrorClass::NotFound,
                kube::Error::Api(ae) if ae.code == 422 => ErrorClass::Spec,
                _ => ErrorClass::TransientInfra,
            },
            Error::Validation { .. } => ErrorClass::Spec,
            Error::NotFound { .. } => ErrorClass::NotFound,
            Error::NotReady { .. } => ErrorClass::TransientInfra,
            Error::Transport { .. } => ErrorClass::TransientInfra,
            Error::Domain { transient, .. } => {
                if *transient {
                    ErrorClass::TransientInfra
                } else {
                    ErrorClass::Domain
                }
            }
            Error::ExternalService { .. } => ErrorClass::ExternalService,
            Error::Serialization { .. } => ErrorClass::Spec,
            Error::Internal { .. } => ErrorClass::TransientInfra,
        }
    }

    /// Check if this error is retryable without a spec change
    ///
    /// Validation, serialization and permanent domain errors are not
    /// retryable. External service failures are not retryable in the
    /// "stay in phase" sense, they move the resource to Failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::TransientInfra | ErrorClass::NotFound
        )
    }

    /// Vendor error code if this is a domain error
    pub fn domain_code(&self) -> Option<&str> {
        match self {
            Error::Domain { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if this wraps a Kubernetes 409 Conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Get the resource name if this error is associated with a specific resource
    pub fn resource(&self) -> Option<&str> {
        match self {
            Error::Validation { resource, .. } => Some(resource),
            Error::NotReady { resource, .. } => Some(resource),
            Error::ExternalService { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
