//! Broker operations
//!
//! Everything here talks to the broker through typed commands run in a
//! member pod. Reads go through the primary with OS authentication. Writes
//! that need the SYS password connect to the primary from another pod and
//! take the password from a short-lived file.

use std::collections::BTreeSet;

use tracing::{debug, info};

use oradb_common::crd::ProtectionMode;
use oradb_common::LISTENER_PORT;
use oradb_exec::{run, with_secret_file, Command, ExecError, OraCode, PodExecutor, PodRef};

use crate::group::{join_targets, parse_targets, ReplicationGroup};

/// Broker configuration name
pub const CONFIGURATION_NAME: &str = "dg_config";

/// Service name the broker registers for the primary role
pub const BROKER_SERVICE_NAME: &str = "DATAGUARD";

/// Connect identifier of a member: `<resource>:1521/<SID>`
pub fn connect_identifier(resource: &str, sid: &str) -> String {
    format!("{resource}:{LISTENER_PORT}/{}", sid.to_ascii_uppercase())
}

/// Live membership query
pub fn membership_query() -> Command {
    Command::sql("SELECT DATABASE || ':' || DATAGUARD_ROLE AS DATABASE FROM V$DG_BROKER_CONFIG;")
}

fn protection_lines(mode: ProtectionMode, sids: &[&str]) -> Vec<String> {
    let mut lines: Vec<String> = sids
        .iter()
        .map(|sid| {
            format!(
                "EDIT DATABASE {sid} SET PROPERTY LogXptMode='{}';",
                mode.log_xpt_mode()
            )
        })
        .collect();
    lines.push(format!(
        "EDIT CONFIGURATION SET PROTECTION MODE AS {};",
        mode.to_string().to_ascii_uppercase()
    ));
    lines
}

/// Script creating the configuration with its first standby
pub fn bootstrap_script(
    primary: (&str, &str),
    standby: (&str, &str),
    mode: ProtectionMode,
) -> String {
    let (primary_sid, primary_connect) = primary;
    let (standby_sid, standby_connect) = standby;
    let mut lines = vec![
        format!(
            "CREATE CONFIGURATION {CONFIGURATION_NAME} AS PRIMARY DATABASE IS {primary_sid} CONNECT IDENTIFIER IS '{primary_connect}';"
        ),
        format!(
            "ADD DATABASE {standby_sid} AS CONNECT IDENTIFIER IS '{standby_connect}' MAINTAINED AS PHYSICAL;"
        ),
    ];
    lines.extend(protection_lines(mode, &[primary_sid, standby_sid]));
    lines.push("ENABLE CONFIGURATION;".to_string());
    lines.join("\n")
}

/// Script adding a standby to an existing configuration
pub fn add_member_script(standby: (&str, &str), mode: ProtectionMode) -> String {
    let (sid, connect) = standby;
    let mut lines = vec![format!(
        "ADD DATABASE {sid} AS CONNECT IDENTIFIER IS '{connect}' MAINTAINED AS PHYSICAL;"
    )];
    lines.extend(
        protection_lines(mode, &[sid])
            .into_iter()
            .filter(|l| l.starts_with("EDIT DATABASE")),
    );
    lines.push(format!("ENABLE DATABASE {sid};"));
    lines.join("\n")
}

/// How a member joined the configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Join {
    /// The configuration was created with this member
    Bootstrapped,
    /// The member was added to an existing configuration
    Added,
}

/// Read-only view of the broker as seen from the primary pod
pub struct Broker<'a> {
    executor: &'a dyn PodExecutor,
    primary: PodRef,
}

impl<'a> Broker<'a> {
    /// Broker reached through `primary`
    pub fn new(executor: &'a dyn PodExecutor, primary: PodRef) -> Self {
        Self { executor, primary }
    }

    /// Pod the broker is reached through
    pub fn primary_pod(&self) -> &PodRef {
        &self.primary
    }

    /// True when a configuration exists.
    ///
    /// ORA-16532 means none was created yet. ORA-16525 (broker still
    /// starting) surfaces as a transient error.
    pub async fn configuration_exists(&self) -> Result<bool, ExecError> {
        let out = run(
            self.executor,
            &self.primary,
            &Command::dgmgrl_local("SHOW CONFIGURATION;"),
        )
        .await?;
        Ok(!out.has_code(OraCode::CONFIGURATION_MISSING))
    }

    /// Current membership and roles
    pub async fn group(&self) -> Result<ReplicationGroup, ExecError> {
        let out = run(self.executor, &self.primary, &membership_query()).await?;
        Ok(ReplicationGroup::from_broker(out.broker_members()))
    }

    /// Failover targets currently set on `sid`
    pub async fn failover_targets(&self, sid: &str) -> Result<BTreeSet<String>, ExecError> {
        let out = run(
            self.executor,
            &self.primary,
            &Command::dgmgrl_local(format!("SHOW DATABASE {sid} FASTSTARTFAILOVERTARGET;")),
        )
        .await?;
        Ok(out
            .stdout
            .lines()
            .find(|l| l.to_ascii_uppercase().contains("FASTSTARTFAILOVERTARGET"))
            .and_then(|l| l.split_once('='))
            .map(|(_, value)| parse_targets(value))
            .unwrap_or_default())
    }

    /// Set the failover targets of `sid` and read them back.
    ///
    /// Returns the targets found after the write.
    pub async fn set_failover_targets(
        &self,
        sid: &str,
        targets: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ExecError> {
        info!(sid, targets = %join_targets(targets), "setting failover targets");
        run(
            self.executor,
            &self.primary,
            &Command::dgmgrl_local(format!(
                "EDIT DATABASE {sid} SET PROPERTY FASTSTARTFAILOVERTARGET='{}';",
                join_targets(targets)
            )),
        )
        .await?;
        self.failover_targets(sid).await
    }

    /// Enable or disable fast-start failover
    pub async fn set_fast_start_failover(&self, enabled: bool) -> Result<(), ExecError> {
        let verb = if enabled { "ENABLE" } else { "DISABLE" };
        run(
            self.executor,
            &self.primary,
            &Command::dgmgrl_local(format!("{verb} FAST_START FAILOVER;")),
        )
        .await
        .map(|_| ())
    }

    /// Drop `sid` from the configuration. The database keeps running and
    /// keeps its role.
    pub async fn remove_database(&self, sid: &str) -> Result<(), ExecError> {
        info!(sid, "removing database from broker configuration");
        run(
            self.executor,
            &self.primary,
            &Command::dgmgrl_local(format!("REMOVE DATABASE {sid};")),
        )
        .await
        .map(|_| ())
    }

    /// Drop the configuration. A missing configuration is fine.
    pub async fn remove_configuration(&self) -> Result<(), ExecError> {
        run(
            self.executor,
            &self.primary,
            &Command::dgmgrl_local("REMOVE CONFIGURATION;"),
        )
        .await
        .map(|_| ())
    }
}

/// Run a broker script as SYS against `primary_connect` from `issuer`.
///
/// The password file exists on `issuer` only while the script runs.
pub async fn run_as_sys(
    executor: &dyn PodExecutor,
    issuer: &PodRef,
    primary_connect: &str,
    password: &str,
    script: String,
) -> Result<(), ExecError> {
    with_secret_file(executor, issuer, password, |path| async move {
        run(
            executor,
            issuer,
            &Command::dgmgrl_remote(primary_connect, path, script),
        )
        .await
        .map(|_| ())
    })
    .await
}

/// A standby joining the configuration
pub struct Joiner<'a> {
    /// Pod of the standby; the script is issued from here
    pub pod: &'a PodRef,
    /// Standby SID
    pub sid: &'a str,
    /// Standby connect identifier
    pub connect: &'a str,
}

/// Bootstrap the configuration with `joiner`, or add `joiner` to the
/// existing one.
pub async fn join(
    executor: &dyn PodExecutor,
    configuration_exists: bool,
    primary: (&str, &str),
    joiner: &Joiner<'_>,
    password: &str,
    mode: ProtectionMode,
) -> Result<Join, ExecError> {
    let (primary_sid, primary_connect) = primary;
    let (script, how) = if configuration_exists {
        (add_member_script((joiner.sid, joiner.connect), mode), Join::Added)
    } else {
        (
            bootstrap_script(primary, (joiner.sid, joiner.connect), mode),
            Join::Bootstrapped,
        )
    };
    debug!(standby = joiner.sid, primary = primary_sid, ?how, "joining broker configuration");
    run_as_sys(executor, joiner.pod, primary_connect, password, script).await?;
    Ok(how)
}
