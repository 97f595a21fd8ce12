//! Phase handlers for the SingleInstanceDatabase controller.
//!
//! `Validating → Provisioning → WaitingReady → Configuring → Ready`. Each
//! handler inspects the world, mutates the working status copy and returns
//! a [`Transition`]. [`drive`] chains handlers within one pass until one of
//! them has to wait, so a healthy database converges without extra
//! requeues. Errors are returned as-is; the caller maps them to Failed or a
//! retry.

mod configuring;
mod provisioning;
mod ready;
mod validating;
mod waiting_ready;

pub use configuring::handle_configuring;
pub use provisioning::handle_provisioning;
pub use ready::handle_ready;
pub use validating::handle_validating;
pub use waiting_ready::handle_waiting_ready;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use oradb_common::crd::{DatabasePhase, SingleInstanceDatabase, SingleInstanceDatabaseStatus};
use oradb_common::fingerprint::spec_fingerprint;
use oradb_common::Error;

use crate::controller::Context;
use crate::sync::{cluster_connect_string, external_connect_string};
use crate::templates::external_service_name;

/// Upper bound on handler invocations in one pass
const MAX_STEPS: usize = 8;

/// Result of one phase handler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given phase and keep going
    Advance(DatabasePhase),
    /// Stay in the current phase and check again later
    Wait(String),
    /// Converged; nothing left to do this pass
    Done,
}

/// How a pass ended when no handler failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Waiting on the cluster or the database
    Waiting(String),
    /// The database is Ready and converged
    Converged,
}

/// Run phase handlers starting from `status.phase` until one waits or the
/// database is converged.
///
/// A Ready database whose spec fingerprint no longer matches the applied one
/// re-enters Validating. A Failed database is re-validated on every pass, so
/// it recovers once the spec or the environment is fixed.
pub async fn drive(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    status: &mut SingleInstanceDatabaseStatus,
) -> Result<Outcome, Error> {
    let fingerprint = spec_fingerprint(&db.spec)?;
    match status.phase {
        DatabasePhase::Ready if status.applied_spec_hash.as_deref() != Some(&fingerprint) => {
            info!("spec changed, revalidating");
            status.phase = DatabasePhase::Validating;
        }
        DatabasePhase::Failed | DatabasePhase::Deleting => {
            status.phase = DatabasePhase::Validating;
        }
        _ => {}
    }

    for _ in 0..MAX_STEPS {
        let transition = match status.phase {
            DatabasePhase::Validating => handle_validating(db, ctx, status).await?,
            DatabasePhase::Provisioning => handle_provisioning(db, ctx, status).await?,
            DatabasePhase::WaitingReady => handle_waiting_ready(db, ctx, status).await?,
            DatabasePhase::Configuring => handle_configuring(db, ctx, status, &fingerprint).await?,
            DatabasePhase::Ready => handle_ready(db, ctx, status).await?,
            DatabasePhase::Failed | DatabasePhase::Deleting => {
                return Ok(Outcome::Waiting(format!("phase {}", status.phase)))
            }
        };

        match transition {
            Transition::Advance(next) => {
                debug!(from = %status.phase, to = %next, "phase transition");
                status.phase = next;
            }
            Transition::Wait(message) => return Ok(Outcome::Waiting(message)),
            Transition::Done => return Ok(Outcome::Converged),
        }
    }

    Ok(Outcome::Waiting(format!(
        "phase {} did not settle in one pass",
        status.phase
    )))
}

/// Service name clients connect to: the PDB when one is configured
pub(crate) fn connect_service_name(db: &SingleInstanceDatabase) -> String {
    db.spec.pdb_name.clone().unwrap_or_else(|| db.spec.sid_upper())
}

/// Recompute both connect strings. The external one stays unset until the
/// load balancer or node address is known.
pub(crate) async fn refresh_connect_strings(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    status: &mut SingleInstanceDatabaseStatus,
    ready_pod: Option<&Pod>,
) -> Result<(), Error> {
    let name = db.name_any();
    let ns = db.namespace().unwrap_or_default();
    let service_name = connect_service_name(db);

    status.cluster_connect_string = Some(cluster_connect_string(&name, &ns, &service_name));

    let node_ip = ready_pod
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.host_ip.as_deref());
    status.connect_string = ctx
        .kube
        .get_service(&ns, &external_service_name(&name))
        .await?
        .and_then(|svc| external_connect_string(&svc, node_ip, &service_name));
    Ok(())
}
