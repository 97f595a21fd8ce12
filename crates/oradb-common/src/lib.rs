//! Common types for oradb: CRDs, errors, status reporting and controller plumbing

#![deny(missing_docs)]

pub mod conditions;
pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod kube_utils;
pub mod requeue;
pub mod retry;
pub mod telemetry;

pub use config::ControllerConfig;
pub use error::{Error, ErrorClass};
pub use requeue::{Disposition, RequeuePolicy};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for all status and metadata patches
pub const FIELD_MANAGER: &str = "oradb-controller";

/// Label carrying the owning resource name on pods and used as the service selector
pub const LABEL_APP: &str = "app";

/// Label carrying the image version a pod was created from
pub const LABEL_VERSION: &str = "version";

/// Label marking objects managed by this operator
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY_VALUE: &str = "oradb";

/// Database listener port
pub const LISTENER_PORT: i32 = 1521;

/// XML DB / EM Express port
pub const XMLDB_PORT: i32 = 5500;
