//! Command-line interface

use std::time::Duration;

use clap::Parser;

use oradb_common::config::{DEFAULT_CONCURRENCY, DEFAULT_MARKER_TTL};
use oradb_common::telemetry::LogFormat;
use oradb_common::{ControllerConfig, RequeuePolicy};

/// oradb - Kubernetes operator for Oracle single-instance databases,
/// Data Guard brokers and pluggable databases
#[derive(Parser, Debug)]
#[command(name = "oradb-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Install or update CRDs before starting the controllers
    #[arg(long, env = "ORADB_INSTALL_CRDS")]
    pub install_crds: bool,

    /// Resources reconciled in parallel per kind
    #[arg(long, env = "ORADB_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: u16,

    /// Requeue delay for transient errors and "not ready yet"
    #[arg(long, env = "ORADB_TRANSIENT_REQUEUE_SECS", default_value_t = 15)]
    pub transient_requeue_secs: u64,

    /// Requeue delay for failed resources; 0 waits for a spec change instead
    #[arg(long, env = "ORADB_PERMANENT_REQUEUE_SECS", default_value_t = 300)]
    pub permanent_requeue_secs: u64,

    /// Status refresh interval for converged resources
    #[arg(long, env = "ORADB_READY_REQUEUE_SECS", default_value_t = 60)]
    pub ready_requeue_secs: u64,

    /// Age after which a switchover marker is considered abandoned
    #[arg(long, env = "ORADB_MARKER_TTL_SECS", default_value_t = DEFAULT_MARKER_TTL.as_secs())]
    pub marker_ttl_secs: u64,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "ORADB_NAMESPACE")]
    pub namespace: Option<String>,

    /// Log format: json or text
    #[arg(long, env = "ORADB_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Controller configuration handed to every controller context
    pub fn controller_config(&self) -> ControllerConfig {
        let permanent = (self.permanent_requeue_secs > 0)
            .then(|| Duration::from_secs(self.permanent_requeue_secs));
        ControllerConfig {
            requeue: RequeuePolicy {
                transient: Duration::from_secs(self.transient_requeue_secs),
                permanent,
                ready: Duration::from_secs(self.ready_requeue_secs),
            },
            marker_ttl: Duration::from_secs(self.marker_ttl_secs),
            concurrency: self.concurrency,
            namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_controller_defaults() {
        let cli = Cli::try_parse_from(["oradb-operator"]).unwrap();
        let config = cli.controller_config();
        let defaults = ControllerConfig::default();

        assert_eq!(config.requeue, defaults.requeue);
        assert_eq!(config.marker_ttl, defaults.marker_ttl);
        assert_eq!(config.concurrency, 100);
        assert_eq!(config.namespace, None);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(!cli.crd);
    }

    #[test]
    fn zero_permanent_interval_waits_for_changes() {
        let cli = Cli::try_parse_from([
            "oradb-operator",
            "--permanent-requeue-secs",
            "0",
            "--namespace",
            "prod",
            "--log-format",
            "text",
        ])
        .unwrap();
        let config = cli.controller_config();
        assert_eq!(config.requeue.permanent, None);
        assert_eq!(config.namespace.as_deref(), Some("prod"));
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["oradb-operator", "--log-format", "xml"]).is_err());
    }
}
