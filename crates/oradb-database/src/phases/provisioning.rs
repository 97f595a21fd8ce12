//! Provisioning phase: one resource synchronizer pass

use kube::runtime::events::EventType;
use kube::Resource;

use oradb_common::crd::{
    DatabasePhase, HealthStatus, SingleInstanceDatabase, SingleInstanceDatabaseStatus,
};
use oradb_common::events::{actions, reasons};
use oradb_common::Error;

use super::Transition;
use crate::controller::Context;
use crate::sync::{synchronize, PodSync};

/// Handle a database in the Provisioning phase
pub async fn handle_provisioning(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    status: &mut SingleInstanceDatabaseStatus,
) -> Result<Transition, Error> {
    if status.status == HealthStatus::Pending {
        ctx.events
            .publish(
                &db.object_ref(&()),
                EventType::Normal,
                reasons::PROVISIONING_STARTED,
                actions::PROVISION,
                Some(format!("Provisioning database {}", db.spec.sid_upper())),
            )
            .await;
    }
    status.status = if status.datafiles_created {
        HealthStatus::Updating
    } else {
        HealthStatus::Creating
    };

    match synchronize(db, ctx).await? {
        PodSync::Converged => Ok(Transition::Advance(DatabasePhase::WaitingReady)),
        PodSync::Progressing(message) => Ok(Transition::Wait(message)),
    }
}
