//! Validating phase: spec checks, immutable fields and the admin secret

use kube::ResourceExt;
use tracing::debug;

use oradb_common::crd::{
    DatabasePhase, HealthStatus, SingleInstanceDatabase, SingleInstanceDatabaseSpec,
    SingleInstanceDatabaseStatus,
};
use oradb_common::Error;

use super::Transition;
use crate::controller::Context;
use crate::error::DatabaseError;

/// Reject changes to fields that are baked into the datafiles.
///
/// Until datafiles exist the recorded values simply follow the spec.
pub fn check_immutable(
    spec: &SingleInstanceDatabaseSpec,
    status: &SingleInstanceDatabaseStatus,
) -> Result<(), DatabaseError> {
    if !status.datafiles_created {
        return Ok(());
    }

    let sid = spec.sid_upper();
    if let Some(recorded) = status.sid.as_deref().filter(|s| *s != sid) {
        return Err(DatabaseError::ImmutableField {
            field: "spec.sid",
            from: recorded.to_string(),
            to: sid,
        });
    }
    if let Some(recorded) = status.edition.filter(|e| *e != spec.edition) {
        return Err(DatabaseError::ImmutableField {
            field: "spec.edition",
            from: recorded.to_string(),
            to: spec.edition.to_string(),
        });
    }
    if let (Some(recorded), Some(wanted)) = (&status.charset, &spec.charset) {
        if !recorded.eq_ignore_ascii_case(wanted) {
            return Err(DatabaseError::ImmutableField {
                field: "spec.charset",
                from: recorded.clone(),
                to: wanted.clone(),
            });
        }
    }
    if let (Some(recorded), Some(wanted)) = (&status.pdb_name, &spec.pdb_name) {
        if !recorded.eq_ignore_ascii_case(wanted) {
            return Err(DatabaseError::ImmutableField {
                field: "spec.pdbName",
                from: recorded.clone(),
                to: wanted.clone(),
            });
        }
    }
    Ok(())
}

/// Handle a database in the Validating phase
pub async fn handle_validating(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    status: &mut SingleInstanceDatabaseStatus,
) -> Result<Transition, Error> {
    let ns = db.namespace().unwrap_or_default();
    let spec = &db.spec;

    spec.validate()?;
    check_immutable(spec, status)?;

    let secret = &spec.admin_password;
    let password = ctx
        .kube
        .get_secret_value(&ns, &secret.secret_name, &secret.secret_key)
        .await?;
    if password.is_none() {
        status.status = HealthStatus::Pending;
        return Err(Error::not_found(
            "Secret",
            format!("{}/{} (key {})", ns, secret.secret_name, secret.secret_key),
        ));
    }

    if !status.datafiles_created {
        status.sid = Some(spec.sid_upper());
        status.edition = Some(spec.edition);
        status.charset = spec.charset.clone();
        status.pdb_name = spec.pdb_name.clone();
    }
    debug!("spec valid");
    Ok(Transition::Advance(DatabasePhase::Provisioning))
}
