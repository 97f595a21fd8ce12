//! In-instance command execution for oradb
//!
//! The database pods are the only place the replication broker and SQL can
//! be reached, so exec is used as a narrow RPC channel:
//!
//! - **[`Command`]**: typed command kinds rendered to `bash -c` scripts
//! - **[`PodExecutor`]**: transport, implemented over the Kubernetes exec API
//! - **[`CommandOutput`]**: parsed result with vendor error-code detection
//! - **[`with_secret_file`]**: short-lived credential files that are always removed
//! - **[`MarkerLock`]**: the readiness-probe marker, used as a TTL advisory lock
//!
//! Two error channels are kept apart. A transport failure means the command
//! did not run. A vendor code in stdout means it ran and the database said no.
//! [`run`] checks both.

pub mod command;
pub mod error;
pub mod executor;
pub mod marker;
pub mod output;
pub mod secret;

pub use command::{Command, DgmgrlTarget, MARKER_TAKEN};
pub use error::ExecError;
pub use executor::{run, KubePodExecutor, PodExecutor, PodRef};
pub use marker::{with_marker, MarkerHolder, MarkerLock};
pub use output::{CommandOutput, LogFlags, OraClass, OraCode};
pub use secret::{secret_file_path, with_secret_file};
