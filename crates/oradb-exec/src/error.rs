//! Exec error types

use thiserror::Error;

use crate::output::{OraClass, OraCode};

/// Errors from running a command in a pod
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command could not be delivered or its result could not be read
    #[error("exec transport failed on {pod}: {message}")]
    Transport {
        /// Target pod
        pod: String,
        /// What failed
        message: String,
    },

    /// The command ran and exited non-zero without a vendor code
    #[error("command '{command}' on {pod} exited with {exit_code}: {stderr}")]
    NonZeroExit {
        /// Target pod
        pod: String,
        /// Redacted command
        command: String,
        /// Exit code reported by the kubelet
        exit_code: i32,
        /// Captured stderr
        stderr: String,
    },

    /// The command ran and the database reported a vendor code
    #[error("{code} on {pod}: {line}")]
    Domain {
        /// Target pod
        pod: String,
        /// Vendor code
        code: OraCode,
        /// Output line the code appeared on
        line: String,
    },

    /// The marker on the pod is held by another owner
    #[error("marker on {pod} is held by another operation")]
    Locked {
        /// Target pod
        pod: String,
    },
}

impl ExecError {
    /// Create a transport error
    pub fn transport(pod: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transport {
            pod: pod.into(),
            message: msg.into(),
        }
    }

    /// Vendor code carried by a domain error
    pub fn ora_code(&self) -> Option<OraCode> {
        match self {
            Self::Domain { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a later retry may succeed without user action
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::NonZeroExit { .. } | Self::Locked { .. } => true,
            Self::Domain { code, .. } => code.classify() != OraClass::Permanent,
        }
    }
}

impl From<ExecError> for oradb_common::Error {
    fn from(e: ExecError) -> Self {
        let transient = e.is_transient();
        match e {
            ExecError::Transport { pod, message } => oradb_common::Error::transport(pod, message),
            ExecError::NonZeroExit {
                pod,
                command,
                exit_code,
                stderr,
            } => oradb_common::Error::transport(
                pod,
                format!("'{command}' exited with {exit_code}: {stderr}"),
            ),
            ExecError::Domain { pod, code, line } => {
                oradb_common::Error::domain(pod, code.to_string(), line, transient)
            }
            ExecError::Locked { pod } => {
                oradb_common::Error::not_ready(pod, "marker held by another operation")
            }
        }
    }
}
