//! Ready phase: status refresh only

use kube::ResourceExt;
use tracing::info;

use oradb_common::crd::{DatabasePhase, SingleInstanceDatabase, SingleInstanceDatabaseStatus};
use oradb_common::Error;
use oradb_exec::{run, Command, PodRef};

use super::{refresh_connect_strings, Transition};
use crate::controller::Context;
use crate::sync::PodInventory;

/// Handle a database in the Ready phase.
///
/// Reads only. Replica drift sends the database back to Provisioning and a
/// different serving pod back to WaitingReady; otherwise role and connect
/// strings are refreshed.
pub async fn handle_ready(
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
    if !inv.stale.is_empty() || inv.replicas_found() != desired {
        info!(
            found = inv.replicas_found(),
            desired, "replica drift, reprovisioning"
        );
        return Ok(Transition::Advance(DatabasePhase::Provisioning));
    }
    let Some(ready) = inv.ready.as_ref() else {
        info!("no pod serving");
        return Ok(Transition::Advance(DatabasePhase::WaitingReady));
    };
    if status.ready_pod.as_deref() != Some(ready.name_any().as_str()) {
        info!(pod = %ready.name_any(), "serving pod changed");
        return Ok(Transition::Advance(DatabasePhase::WaitingReady));
    }

    let pod = PodRef::new(&ns, ready.name_any());
    if let Some(role) = run(ctx.executor.as_ref(), &pod, &Command::database_role())
        .await?
        .database_role()
    {
        status.role = Some(role);
    }
    refresh_connect_strings(db, ctx, status, Some(ready)).await?;

    Ok(Transition::Done)
}
