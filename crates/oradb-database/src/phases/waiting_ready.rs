//! WaitingReady phase: wait for one pod to report ready

use kube::ResourceExt;
use tracing::debug;

use oradb_common::crd::{
    DatabasePhase, HealthStatus, SingleInstanceDatabase, SingleInstanceDatabaseStatus,
};
use oradb_common::Error;
use oradb_exec::{run, Command, PodRef};

use super::Transition;
use crate::controller::Context;
use crate::sync::pods::is_pod_running;
use crate::sync::PodInventory;

/// Handle a database in the WaitingReady phase
pub async fn handle_waiting_ready(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    status: &mut SingleInstanceDatabaseStatus,
) -> Result<Transition, Error> {
    let name = db.name_any();
    let ns = db.namespace().unwrap_or_default();
    let desired = db.spec.replicas.max(1) as usize;

    let inv = PodInventory::new(
        ctx.kube.list_pods(&ns, &name).await?,
        &db.spec.image.version_label(),
    );
    status.replicas = inv.replicas_found() as i32;

    if !inv.stale.is_empty() || (inv.replicas_found() < desired && inv.terminating.is_empty()) {
        return Ok(Transition::Advance(DatabasePhase::Provisioning));
    }

    if let Some(ready) = inv.ready_pod_name() {
        debug!(pod = %ready, "database pod ready");
        status.ready_pod = Some(ready);
        return Ok(Transition::Advance(DatabasePhase::Configuring));
    }
    status.ready_pod = None;

    if !status.datafiles_created {
        if let Some(running) = inv.current.iter().find(|p| is_pod_running(p)) {
            let pod = PodRef::new(&ns, running.name_any());
            let out = run(ctx.executor.as_ref(), &pod, &Command::checkpoint_exists()).await?;
            if out.is_true() {
                debug!(pod = %pod, "datafiles present");
                status.datafiles_created = true;
            }
        }
    }
    status.status = if status.datafiles_created {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Creating
    };

    Ok(Transition::Wait(
        "waiting for a database pod to become ready".to_string(),
    ))
}
