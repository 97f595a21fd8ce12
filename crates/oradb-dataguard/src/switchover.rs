//! Planned role change
//!
//! Promotes a standby and demotes the current primary. The outcome is
//! never taken from the broker's own report: roles are read back from both
//! databases after the command, whatever it printed.

use tracing::{info, instrument};

use oradb_common::crd::DatabaseRole;
use oradb_common::Error;
use oradb_exec::{run, Command, MarkerLock, PodExecutor, PodRef};

use crate::broker::run_as_sys;
use crate::error::BrokerError;
use crate::group::ReplicationGroup;
use crate::lock::with_pair_lock;

/// One side of a switchover
#[derive(Clone, Debug)]
pub struct Side {
    /// SID
    pub sid: String,
    /// Serving pod
    pub pod: PodRef,
}

/// Result of a switchover request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Switchover {
    /// The target already is primary; nothing was run
    AlreadyPrimary,
    /// The command ran; roles as read back from each database
    Completed {
        /// Role of the former primary
        former_primary: DatabaseRole,
        /// Role of the target
        target: DatabaseRole,
    },
}

/// Inputs of a switchover
pub struct SwitchoverRequest<'a> {
    /// Live membership
    pub group: &'a ReplicationGroup,
    /// Current primary
    pub primary: &'a Side,
    /// Standby to promote
    pub target: &'a Side,
    /// Connect identifier of the current primary
    pub primary_connect: &'a str,
    /// SYS password
    pub password: &'a str,
}

async fn read_role(executor: &dyn PodExecutor, pod: &PodRef) -> Result<DatabaseRole, Error> {
    let out = run(executor, pod, &Command::database_role()).await?;
    Ok(out.database_role().unwrap_or(DatabaseRole::Unknown))
}

/// Switch roles between the current primary and `request.target`.
///
/// A target that already is primary is a no-op without any command. A
/// target the broker does not know is retried later. Otherwise the marker
/// pair is taken, `SWITCHOVER` is issued from the primary pod and both
/// markers are removed again before the roles are re-read.
#[instrument(skip(executor, lock, request), fields(target = %request.target.sid))]
pub async fn switchover(
    executor: &dyn PodExecutor,
    lock: &MarkerLock,
    request: SwitchoverRequest<'_>,
) -> Result<Switchover, Error> {
    let SwitchoverRequest {
        group,
        primary,
        target,
        primary_connect,
        password,
    } = request;

    match group.role(&target.sid) {
        Some(DatabaseRole::Primary) => {
            info!("target already primary");
            return Ok(Switchover::AlreadyPrimary);
        }
        Some(_) => {}
        None => {
            return Err(BrokerError::UnknownMember {
                sid: target.sid.clone(),
            }
            .into())
        }
    }

    let script = format!("SWITCHOVER TO {};", target.sid.to_ascii_uppercase());
    with_pair_lock(executor, lock, &primary.pod, &target.pod, || async move {
        info!(from = %primary.sid, "issuing switchover");
        run_as_sys(executor, &primary.pod, primary_connect, password, script).await
    })
    .await?;

    let former_primary = read_role(executor, &primary.pod).await?;
    let target_role = read_role(executor, &target.pod).await?;
    info!(%former_primary, target = %target_role, "roles after switchover");
    Ok(Switchover::Completed {
        former_primary,
        target: target_role,
    })
}
