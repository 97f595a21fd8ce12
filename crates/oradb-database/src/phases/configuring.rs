//! Configuring phase: post-ready convergence inside the database
//!
//! Runs against the ready pod once it serves. Log mode changes and the
//! `processes` parameter need an instance bounce; the bounce is bracketed
//! by the marker so the readiness probe keeps the pod in its service.

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use oradb_common::crd::{
    DatabasePhase, DatabaseRole, HealthStatus, InitParams, SingleInstanceDatabase,
    SingleInstanceDatabaseStatus,
};
use oradb_common::events::{actions, reasons};
use oradb_common::Error;
use oradb_exec::{run, with_marker, with_secret_file, Command, CommandOutput, MarkerLock, PodRef};

use super::{refresh_connect_strings, Transition};
use crate::controller::Context;
use crate::error::DatabaseError;

const MB: i64 = 1024 * 1024;

const DATAPATCH: &str = "$ORACLE_HOME/OPatch/datapatch -skip_upgrade_check";

const INIT_PARAMS_SQL: &str = "SELECT name || ':' || value AS param FROM V$PARAMETER \
     WHERE name IN ('sga_target','pga_aggregate_target','cpu_count','processes');";

const RECOVERY_DEST_SCRIPT: &str = "mkdir -p \"${ORACLE_BASE}/oradata/fast_recovery_area\" && \
sqlplus -s / as sysdba <<EOF
ALTER SYSTEM SET db_recovery_file_dest_size=50G SCOPE=BOTH;
ALTER SYSTEM SET db_recovery_file_dest='${ORACLE_BASE}/oradata/fast_recovery_area' SCOPE=BOTH;
EOF";

/// Marker owner for restarts of `db`
fn marker_owner(db: &SingleInstanceDatabase) -> String {
    format!("{}/{}", db.namespace().unwrap_or_default(), db.name_any())
}

/// Parse `name:value` rows of [`INIT_PARAMS_SQL`]. Memory sizes are
/// reported in bytes and returned in megabytes.
pub fn parse_init_params(out: &CommandOutput) -> InitParams {
    let mut params = InitParams::default();
    for row in out.rows() {
        let Some((name, value)) = row.split_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<i64>() else {
            continue;
        };
        match name.trim() {
            "sga_target" => params.sga_target = Some(value / MB),
            "pga_aggregate_target" => params.pga_aggregate_target = Some(value / MB),
            "cpu_count" => params.cpu_count = Some(value),
            "processes" => params.processes = Some(value),
            _ => {}
        }
    }
    params
}

/// Bounce the instance through MOUNT, running `mounted` in between
async fn restart_with(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    pod: &PodRef,
    mounted: &str,
) -> Result<(), Error> {
    let exec = ctx.executor.as_ref();
    let lock = MarkerLock::new(marker_owner(db), ctx.config.marker_ttl);
    let script = format!(
        "SHUTDOWN IMMEDIATE;\nSTARTUP MOUNT;\n{mounted}\nALTER DATABASE OPEN;\n\
         ALTER PLUGGABLE DATABASE ALL OPEN;\nALTER SYSTEM REGISTER;"
    );

    info!(pod = %pod, mounted, "restarting instance");
    with_marker(exec, pod, &lock, || async move {
        run(exec, pod, &Command::sql(script)).await
    })
    .await?;
    Ok(())
}

async fn verify_admin_password(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    pod: &PodRef,
) -> Result<(), Error> {
    let ns = db.namespace().unwrap_or_default();
    let secret = &db.spec.admin_password;
    let password = ctx
        .kube
        .get_secret_value(&ns, &secret.secret_name, &secret.secret_key)
        .await?
        .ok_or_else(|| Error::not_found("Secret", format!("{ns}/{}", secret.secret_name)))?;

    let exec = ctx.executor.as_ref();
    let out = with_secret_file(exec, pod, &password, |path| async move {
        run(exec, pod, &Command::verify_sys_password(&path)).await
    })
    .await?;

    if !out.is_sys_user() {
        return Err(DatabaseError::AdminPasswordRejected {
            sid: db.spec.sid_upper(),
        }
        .into());
    }
    Ok(())
}

async fn apply_datapatch(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    pod: &PodRef,
    status: &mut SingleInstanceDatabaseStatus,
) -> Result<(), Error> {
    let version = db.spec.image.version_label();
    match status.release_update.as_deref() {
        Some(current) if current == version => return Ok(()),
        Some(_) if !db.spec.image.prebuilt_db => {}
        // First observation, or a prebuilt image that ships patched datafiles.
        _ => {
            status.release_update = Some(version);
            status.datafiles_patched = true;
            return Ok(());
        }
    }

    info!(pod = %pod, version = %version, "running datapatch");
    status.status = HealthStatus::Patching;
    status.datafiles_patched = false;
    run(ctx.executor.as_ref(), pod, &Command::shell(DATAPATCH)).await?;

    status.release_update = Some(version.clone());
    status.datafiles_patched = true;
    ctx.events
        .publish(
            &db.object_ref(&()),
            EventType::Normal,
            reasons::IMAGE_UPDATE_COMPLETE,
            actions::UPDATE,
            Some(format!("Datafiles patched to {version}")),
        )
        .await;
    Ok(())
}

async fn converge_log_flags(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    pod: &PodRef,
    status: &mut SingleInstanceDatabaseStatus,
) -> Result<(), Error> {
    let exec = ctx.executor.as_ref();
    let spec = &db.spec;
    let current = run(exec, pod, &Command::log_flags())
        .await?
        .log_flags()
        .ok_or_else(|| Error::internal_with_context("configure", "could not read log mode flags"))?;

    let archive_log = spec
        .archive_log
        .unwrap_or(current.archive_log || spec.flash_back == Some(true));
    let flashback = archive_log && spec.flash_back.unwrap_or(current.flashback);
    let force_logging = spec.force_log.unwrap_or(current.force_logging);

    // Enabling goes archivelog, force logging, flashback; disabling runs
    // in reverse so flashback is off before archivelog is.
    if archive_log && !current.archive_log {
        restart_with(db, ctx, pod, "ALTER DATABASE ARCHIVELOG;").await?;
    }
    if force_logging != current.force_logging {
        let sql = if force_logging {
            "ALTER DATABASE FORCE LOGGING;\nALTER SYSTEM SWITCH LOGFILE;"
        } else {
            "ALTER DATABASE NO FORCE LOGGING;"
        };
        run(exec, pod, &Command::sql(sql)).await?;
    }
    if flashback != current.flashback {
        if flashback {
            run(exec, pod, &Command::shell(RECOVERY_DEST_SCRIPT)).await?;
            run(exec, pod, &Command::sql("ALTER DATABASE FLASHBACK ON;")).await?;
        } else {
            run(exec, pod, &Command::sql("ALTER DATABASE FLASHBACK OFF;")).await?;
        }
    }
    if !archive_log && current.archive_log {
        restart_with(db, ctx, pod, "ALTER DATABASE NOARCHIVELOG;").await?;
    }

    status.archive_log = Some(archive_log);
    status.flash_back = Some(flashback);
    status.force_log = Some(force_logging);
    Ok(())
}

async fn converge_init_params(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    pod: &PodRef,
    status: &mut SingleInstanceDatabaseStatus,
) -> Result<(), Error> {
    let Some(wanted) = &db.spec.init_params else {
        return Ok(());
    };
    let exec = ctx.executor.as_ref();
    let current = parse_init_params(&run(exec, pod, &Command::sql(INIT_PARAMS_SQL)).await?);

    let differs = |w: Option<i64>, c: Option<i64>| w.filter(|w| Some(*w) != c);
    let mut statements = Vec::new();
    if let Some(v) = differs(wanted.sga_target, current.sga_target) {
        statements.push(format!("ALTER SYSTEM SET sga_target={v}M SCOPE=BOTH;"));
    }
    if let Some(v) = differs(wanted.pga_aggregate_target, current.pga_aggregate_target) {
        statements.push(format!("ALTER SYSTEM SET pga_aggregate_target={v}M SCOPE=BOTH;"));
    }
    if let Some(v) = differs(wanted.cpu_count, current.cpu_count) {
        statements.push(format!("ALTER SYSTEM SET cpu_count={v} SCOPE=BOTH;"));
    }
    if !statements.is_empty() {
        debug!(count = statements.len(), "updating init params");
        run(exec, pod, &Command::sql(statements.join("\n"))).await?;
    }
    if let Some(v) = differs(wanted.processes, current.processes) {
        run(
            exec,
            pod,
            &Command::sql(format!("ALTER SYSTEM SET processes={v} SCOPE=SPFILE;")),
        )
        .await?;
        restart_with(db, ctx, pod, "").await?;
    }

    status.init_params = Some(InitParams {
        sga_target: wanted.sga_target.or(current.sga_target),
        pga_aggregate_target: wanted.pga_aggregate_target.or(current.pga_aggregate_target),
        cpu_count: wanted.cpu_count.or(current.cpu_count),
        processes: wanted.processes.or(current.processes),
    });
    Ok(())
}

/// Handle a database in the Configuring phase
pub async fn handle_configuring(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    status: &mut SingleInstanceDatabaseStatus,
    fingerprint: &str,
) -> Result<Transition, Error> {
    let name = db.name_any();
    let ns = db.namespace().unwrap_or_default();
    let Some(pod_name) = status.ready_pod.clone() else {
        return Ok(Transition::Advance(DatabasePhase::WaitingReady));
    };
    let pod = PodRef::new(&ns, &pod_name);

    verify_admin_password(db, ctx, &pod).await?;

    let role = run(ctx.executor.as_ref(), &pod, &Command::database_role())
        .await?
        .database_role()
        .unwrap_or(DatabaseRole::Unknown);
    status.role = Some(role);

    if role == DatabaseRole::Primary {
        apply_datapatch(db, ctx, &pod, status).await?;
        converge_log_flags(db, ctx, &pod, status).await?;
        converge_init_params(db, ctx, &pod, status).await?;
    } else {
        // Standbys receive patches and log settings through redo apply.
        status.release_update = Some(db.spec.image.version_label());
    }

    let pods = ctx.kube.list_pods(&ns, &name).await?;
    let ready = pods.iter().find(|p| p.name_any() == pod_name);
    refresh_connect_strings(db, ctx, status, ready).await?;

    status.status = HealthStatus::Healthy;
    status.applied_spec_hash = Some(fingerprint.to_string());
    ctx.events
        .publish(
            &db.object_ref(&()),
            EventType::Normal,
            reasons::DATABASE_READY,
            actions::CONFIGURE,
            Some(format!("Database {} is ready on {pod_name}", db.spec.sid_upper())),
        )
        .await;
    Ok(Transition::Advance(DatabasePhase::Ready))
}
