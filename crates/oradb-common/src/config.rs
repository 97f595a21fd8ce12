//! Runtime configuration shared by every controller
//!
//! Built once from the CLI in the operator binary and handed to each
//! controller's context. Nothing here is read from process globals.

use std::time::Duration;

use crate::requeue::RequeuePolicy;

/// Default number of keys reconciled in parallel per resource kind
pub const DEFAULT_CONCURRENCY: u16 = 100;

/// Default age after which a switchover marker is considered abandoned
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(600);

/// Controller configuration
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Requeue intervals
    pub requeue: RequeuePolicy,
    /// Switchover marker TTL
    pub marker_ttl: Duration,
    /// Parallel reconciles per kind
    pub concurrency: u16,
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue: RequeuePolicy::default(),
            marker_ttl: DEFAULT_MARKER_TTL,
            concurrency: DEFAULT_CONCURRENCY,
            namespace: None,
        }
    }
}
