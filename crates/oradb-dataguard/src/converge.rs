//! One coordinator pass over a DataguardBroker
//!
//! The replication group is rebuilt from the broker each time. Members
//! referenced in the spec are added once they are ready standbys, every
//! member gets all others as failover targets, and a requested switchover
//! runs under the paired marker lock. The caller writes `status` back.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use oradb_common::crd::{
    BrokerPhase, DatabasePhase, DatabaseRole, DataguardBroker, DataguardBrokerStatus,
    HealthStatus, SingleInstanceDatabase,
};
use oradb_common::events::{actions, reasons};
use oradb_common::fingerprint::spec_fingerprint;
use oradb_common::Error;
use oradb_database::sync::{cluster_connect_string, external_connect_string, service_drift};
use oradb_database::templates::{database_service, observer_pod, observer_pod_name, ServiceKind};
use oradb_exec::PodRef;

use crate::broker::{connect_identifier, join, Broker, Join, Joiner, BROKER_SERVICE_NAME};
use crate::controller::Context;
use crate::error::BrokerError;
use crate::group::{join_targets, ReplicationGroup};
use crate::switchover::{switchover, Side, Switchover, SwitchoverRequest};

/// Result of a pass that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Group matches the spec
    Converged,
    /// Something is not ready yet; requeue on the short interval
    Waiting(String),
}

/// Pod serving `db`, once the database is Ready
pub fn serving_pod(db: &SingleInstanceDatabase) -> Option<PodRef> {
    let status = db.status.as_ref()?;
    if status.phase != DatabasePhase::Ready {
        return None;
    }
    let pod = status.ready_pod.as_ref()?;
    Some(PodRef::new(db.namespace().unwrap_or_default(), pod.clone()))
}

/// Resource name of the database currently acting as primary.
///
/// Falls back to the spec primary when the recorded one is no longer
/// referenced.
pub fn current_primary_ref(broker: &DataguardBroker, status: &DataguardBrokerStatus) -> String {
    let spec = &broker.spec;
    status
        .primary_database_ref
        .as_ref()
        .filter(|r| **r == spec.primary_database_ref || spec.standby_database_refs.contains(r))
        .cloned()
        .unwrap_or_else(|| spec.primary_database_ref.clone())
}

/// Broker service selecting the pods of `primary_ref`
pub fn broker_service(broker: &DataguardBroker, primary_ref: &str) -> Service {
    database_service(
        broker,
        &broker.name_any(),
        primary_ref,
        ServiceKind::external(broker.spec.load_balancer),
        &broker.spec.service_annotations,
    )
}

fn sid_of(db: &SingleInstanceDatabase) -> String {
    db.status
        .as_ref()
        .and_then(|s| s.sid.clone())
        .unwrap_or_else(|| db.spec.sid_upper())
        .to_ascii_uppercase()
}

async fn publish(ctx: &Context, broker: &DataguardBroker, reason: &str, action: &str, note: String) {
    ctx.events
        .publish(
            &broker.object_ref(&()),
            EventType::Normal,
            reason,
            action,
            Some(note),
        )
        .await;
}

/// Point the broker service at `primary_ref`; returns the service as it
/// now stands.
async fn sync_service(
    ctx: &Context,
    broker: &DataguardBroker,
    namespace: &str,
    primary_ref: &str,
) -> Result<Service, Error> {
    let desired = broker_service(broker, primary_ref);
    let name = broker.name_any();
    if let Some(existing) = ctx.kube.get_service(namespace, &name).await? {
        let drift = service_drift(&existing, &desired);
        if drift.is_empty() {
            return Ok(existing);
        }
        info!(service = %name, ?drift, primary = primary_ref, "updating broker service");
    } else {
        info!(service = %name, primary = primary_ref, "creating broker service");
    }
    ctx.kube.apply_service(namespace, &desired).await?;
    Ok(desired)
}

/// Referenced databases by resource name, plus messages for the missing ones
async fn load_members(
    ctx: &Context,
    broker: &DataguardBroker,
    namespace: &str,
    primary_ref: &str,
) -> Result<(BTreeMap<String, SingleInstanceDatabase>, Vec<String>), Error> {
    let broker_name = broker.name_any();
    let refs = std::iter::once(&broker.spec.primary_database_ref)
        .chain(broker.spec.standby_database_refs.iter());

    let mut members = BTreeMap::new();
    let mut waiting = Vec::new();
    let mut sids: BTreeMap<String, String> = BTreeMap::new();
    for name in refs {
        let Some(db) = ctx.kube.get_database(namespace, name).await? else {
            if name == primary_ref {
                return Err(Error::not_found("SingleInstanceDatabase", name.clone()));
            }
            waiting.push(format!("database {name} not found"));
            continue;
        };

        if let Some(owner) = db.status.as_ref().and_then(|s| s.dg_broker.as_ref()) {
            if *owner != broker_name {
                return Err(BrokerError::MemberOwned {
                    database: name.clone(),
                    broker: owner.clone(),
                }
                .into());
            }
        }
        let sid = sid_of(&db);
        if let Some(first) = sids.insert(sid.clone(), name.clone()) {
            return Err(BrokerError::DuplicateSid {
                sid,
                first,
                second: name.clone(),
            }
            .into());
        }
        members.insert(name.clone(), db);
    }
    Ok((members, waiting))
}

/// Converge the broker configuration towards `broker.spec`.
pub async fn converge(
    broker: &DataguardBroker,
    ctx: &Context,
    status: &mut DataguardBrokerStatus,
) -> Result<Outcome, Error> {
    let name = broker.name_any();
    let ns = broker.namespace().unwrap_or_default();
    let exec = ctx.executor.as_ref();

    broker.spec.validate()?;
    let mode = broker.spec.protection_mode()?;
    let fingerprint = spec_fingerprint(&broker.spec)?;

    let mut primary_ref = current_primary_ref(broker, status);
    let (members, mut waiting) = load_members(ctx, broker, &ns, &primary_ref).await?;
    let by_sid: BTreeMap<String, String> = members
        .iter()
        .map(|(n, db)| (sid_of(db), n.clone()))
        .collect();

    let initial_ref = primary_ref.clone();
    let mut service = sync_service(ctx, broker, &ns, &primary_ref).await?;

    let Some(primary_db) = members.get(&primary_ref) else {
        return Err(Error::not_found("SingleInstanceDatabase", primary_ref));
    };
    let primary_role = primary_db.status.as_ref().and_then(|s| s.role);
    let Some(mut primary_pod) = serving_pod(primary_db).filter(|_| primary_role == Some(DatabaseRole::Primary))
    else {
        status.phase = BrokerPhase::Pending;
        status.status = HealthStatus::Pending;
        return Ok(Outcome::Waiting(format!(
            "waiting for primary database {primary_ref} to be ready"
        )));
    };

    let secret = &primary_db.spec.admin_password;
    let password = ctx
        .kube
        .get_secret_value(&ns, &secret.secret_name, &secret.secret_key)
        .await?
        .ok_or_else(|| Error::not_found("Secret", secret.secret_name.clone()))?;

    let primary_sid = sid_of(primary_db);
    let primary_connect = connect_identifier(&primary_ref, &primary_sid);

    let view = Broker::new(exec, primary_pod.clone());
    let mut exists = view.configuration_exists().await?;
    let mut group = view.group().await?;

    // Add referenced standbys the broker does not know yet.
    let mut joined = false;
    for (db_name, db) in &members {
        let sid = sid_of(db);
        if *db_name == primary_ref || group.contains(&sid) {
            continue;
        }
        let Some(pod) = serving_pod(db) else {
            waiting.push(format!("waiting for standby {db_name} to be ready"));
            continue;
        };
        if !db.status.as_ref().and_then(|s| s.role).is_some_and(|r| r.is_standby()) {
            waiting.push(format!("database {db_name} does not report a standby role"));
            continue;
        }

        status.phase = BrokerPhase::Configuring;
        status.status = HealthStatus::Updating;
        let connect = connect_identifier(db_name, &sid);
        let how = join(
            exec,
            exists,
            (&primary_sid, &primary_connect),
            &Joiner {
                pod: &pod,
                sid: &sid,
                connect: &connect,
            },
            &password,
            mode,
        )
        .await?;
        exists = true;
        joined = true;

        let (reason, note) = match how {
            Join::Bootstrapped => (
                reasons::BROKER_CONFIGURED,
                format!("created broker configuration with {primary_sid} and {sid}"),
            ),
            Join::Added => (reasons::MEMBER_ADDED, format!("added {sid} to the broker configuration")),
        };
        info!(standby = %sid, ?how, "standby joined");
        publish(ctx, broker, reason, actions::CONFIGURE, note).await;
    }
    if joined {
        group = view.group().await?;
    }
    if group.is_empty() {
        status.phase = BrokerPhase::Configuring;
        status.status = HealthStatus::Pending;
        waiting.push("no standby ready to create the broker configuration".to_string());
        return Ok(Outcome::Waiting(waiting.join("; ")));
    }

    let mut broker_primary = group.primary()?.sid.clone();
    let Some(primary_name) = by_sid.get(&broker_primary) else {
        return Err(BrokerError::UnknownMember { sid: broker_primary }.into());
    };
    if *primary_name != primary_ref {
        // The role moved without us; follow the broker.
        info!(from = %primary_ref, to = %primary_name, "adopting primary reported by the broker");
        status.primary_database_ref = Some(primary_name.clone());
        status.phase = BrokerPhase::Configuring;
        return Ok(Outcome::Waiting(format!(
            "broker reports {broker_primary} as primary, following it"
        )));
    }

    // Standbys dropped from the spec leave the configuration. Their SIDs
    // are only known through the resources that are still referenced, so
    // nothing is removed while a reference does not resolve.
    let released: Vec<String> = group
        .standbys()
        .filter(|m| !by_sid.contains_key(&m.sid))
        .map(|m| m.sid.clone())
        .collect();
    if !released.is_empty() {
        let referenced = 1 + broker.spec.standby_database_refs.len();
        if members.len() < referenced {
            waiting.push(format!(
                "not removing {} while referenced databases are missing",
                released.join(",")
            ));
        } else {
            status.phase = BrokerPhase::Configuring;
            status.status = HealthStatus::Updating;
            if status.fast_start_failover {
                info!("disabling fast-start failover before removing members");
                view.set_fast_start_failover(false).await?;
                status.fast_start_failover = false;
            }
            for sid in &released {
                view.remove_database(sid).await?;
                publish(
                    ctx,
                    broker,
                    reasons::MEMBER_REMOVED,
                    actions::CONFIGURE,
                    format!("removed {sid} from the broker configuration"),
                )
                .await;
            }
            group = view.group().await?;
        }
    }

    sync_failover_targets(ctx, broker, &view, &group).await?;

    let fast_start = broker.spec.fast_start_failover && group.len() > 1;
    if fast_start != status.fast_start_failover {
        info!(enabled = fast_start, "changing fast-start failover");
        view.set_fast_start_failover(fast_start).await?;
        status.fast_start_failover = fast_start;
    }
    sync_observer(ctx, broker, &ns, primary_db, status.fast_start_failover).await?;

    for member in group.members() {
        let Some(db_name) = by_sid.get(&member.sid) else {
            continue;
        };
        let owner = members[db_name].status.as_ref().and_then(|s| s.dg_broker.as_deref());
        if owner != Some(name.as_str()) {
            ctx.kube
                .set_member_broker(&ns, db_name, Some(name.clone()))
                .await?;
        }
    }

    release_former_members(ctx, &name, &ns, &members, &group).await?;

    if let Some(requested) = broker
        .spec
        .set_as_primary_database
        .as_deref()
        .map(str::to_ascii_uppercase)
        .filter(|r| *r != broker_primary)
    {
        let target_name = by_sid
            .get(&requested)
            .ok_or_else(|| BrokerError::UnknownMember {
                sid: requested.clone(),
            })?
            .clone();
        let target_pod = serving_pod(&members[&target_name]).ok_or_else(|| {
            Error::not_ready(target_name.clone(), "switchover target is not serving")
        })?;

        status.phase = BrokerPhase::Switching;
        publish(
            ctx,
            broker,
            reasons::SWITCHOVER_STARTED,
            actions::SWITCHOVER,
            format!("switching primary from {broker_primary} to {requested}"),
        )
        .await;

        let lock = ctx.marker_lock(broker);
        let result = switchover(
            exec,
            &lock,
            SwitchoverRequest {
                group: &group,
                primary: &Side {
                    sid: broker_primary.clone(),
                    pod: primary_pod.clone(),
                },
                target: &Side {
                    sid: requested.clone(),
                    pod: target_pod.clone(),
                },
                primary_connect: &primary_connect,
                password: &password,
            },
        )
        .await?;

        match result {
            Switchover::AlreadyPrimary => {}
            Switchover::Completed { target, .. } if target != DatabaseRole::Primary => {
                return Err(Error::not_ready(
                    target_name,
                    format!("switchover ran but {requested} reports role {target}"),
                ));
            }
            Switchover::Completed { former_primary, .. } => {
                publish(
                    ctx,
                    broker,
                    reasons::SWITCHOVER_COMPLETE,
                    actions::SWITCHOVER,
                    format!("{requested} is primary, {broker_primary} is now {former_primary}"),
                )
                .await;
                primary_ref = target_name;
                primary_pod = target_pod;
                group = Broker::new(exec, primary_pod.clone()).group().await?;
                broker_primary = requested;
            }
        }
    }

    for member in group.members() {
        let Some(db_name) = by_sid.get(&member.sid) else {
            continue;
        };
        if members[db_name].status.as_ref().and_then(|s| s.role) != Some(member.role) {
            debug!(database = %db_name, role = %member.role, "recording role");
            ctx.kube.set_member_role(&ns, db_name, member.role).await?;
        }
    }

    if primary_ref != initial_ref {
        service = sync_service(ctx, broker, &ns, &primary_ref).await?;
    }
    let node_ip = ctx
        .kube
        .get_pod(&ns, &primary_pod.name)
        .await?
        .and_then(|p| p.status?.host_ip);

    fill_status(status, &group, &by_sid, &broker_primary, &primary_ref);
    status.protection_mode = Some(mode.to_string());
    status.cluster_connect_string = Some(cluster_connect_string(&name, &ns, BROKER_SERVICE_NAME));
    status.external_connect_string =
        external_connect_string(&service, node_ip.as_deref(), BROKER_SERVICE_NAME);

    if !waiting.is_empty() {
        status.phase = BrokerPhase::Configuring;
        status.status = HealthStatus::Updating;
        return Ok(Outcome::Waiting(waiting.join("; ")));
    }
    status.phase = BrokerPhase::Ready;
    status.status = HealthStatus::Healthy;
    status.applied_spec_hash = Some(fingerprint);
    Ok(Outcome::Converged)
}

/// Clear the broker claim on databases this broker no longer manages
async fn release_former_members(
    ctx: &Context,
    broker_name: &str,
    namespace: &str,
    members: &BTreeMap<String, SingleInstanceDatabase>,
    group: &ReplicationGroup,
) -> Result<(), Error> {
    for db in ctx.kube.list_databases(namespace).await? {
        let db_name = db.name_any();
        let claimed = db.status.as_ref().and_then(|s| s.dg_broker.as_deref()) == Some(broker_name);
        if !claimed || members.contains_key(&db_name) || group.contains(&sid_of(&db)) {
            continue;
        }
        info!(database = %db_name, "releasing database from broker");
        ctx.kube.set_member_broker(namespace, &db_name, None).await?;
    }
    Ok(())
}

/// Run the fast-start failover observer while fast-start failover is on
async fn sync_observer(
    ctx: &Context,
    broker: &DataguardBroker,
    namespace: &str,
    primary: &SingleInstanceDatabase,
    enabled: bool,
) -> Result<(), Error> {
    let pod_name = observer_pod_name(&broker.name_any());
    let existing = ctx.kube.get_pod(namespace, &pod_name).await?;
    match (enabled, existing) {
        (true, None) => {
            info!(pod = %pod_name, "starting observer");
            ctx.kube
                .create_pod(namespace, &observer_pod(broker, primary))
                .await?;
            publish(
                ctx,
                broker,
                reasons::OBSERVER_STARTED,
                actions::CONFIGURE,
                format!("started observer {pod_name}"),
            )
            .await;
        }
        (false, Some(_)) => {
            info!(pod = %pod_name, "stopping observer");
            ctx.kube.delete_pod(namespace, &pod_name).await?;
            publish(
                ctx,
                broker,
                reasons::OBSERVER_STOPPED,
                actions::CONFIGURE,
                format!("stopped observer {pod_name}"),
            )
            .await;
        }
        _ => {}
    }
    Ok(())
}

/// Give every member all other members as failover targets
async fn sync_failover_targets(
    ctx: &Context,
    broker: &DataguardBroker,
    view: &Broker<'_>,
    group: &ReplicationGroup,
) -> Result<(), Error> {
    let mut changed = Vec::new();
    for member in group.members() {
        let want = group.failover_targets(&member.sid);
        let have = view.failover_targets(&member.sid).await?;
        if have == want {
            continue;
        }
        let found = view.set_failover_targets(&member.sid, &want).await?;
        if found != want {
            return Err(BrokerError::TargetMismatch {
                sid: member.sid.clone(),
                expected: join_targets(&want),
                found: join_targets(&found),
            }
            .into());
        }
        changed.push(member.sid.clone());
    }
    if !changed.is_empty() {
        publish(
            ctx,
            broker,
            reasons::FAILOVER_TARGETS_SET,
            actions::CONFIGURE,
            format!("failover targets updated on {}", changed.join(",")),
        )
        .await;
    }
    Ok(())
}

fn fill_status(
    status: &mut DataguardBrokerStatus,
    group: &ReplicationGroup,
    by_sid: &BTreeMap<String, String>,
    primary_sid: &str,
    primary_ref: &str,
) {
    let standbys: Vec<&str> = group.standbys().map(|m| m.sid.as_str()).collect();
    status.primary_database_ref = Some(primary_ref.to_string());
    status.primary_database = Some(primary_sid.to_string());
    status.standby_databases = (!standbys.is_empty()).then(|| standbys.join(","));
    status.databases_in_dataguard_config = group
        .members()
        .iter()
        .map(|m| {
            let resource = by_sid.get(&m.sid).cloned().unwrap_or_else(|| m.sid.clone());
            (m.sid.clone(), resource)
        })
        .collect();
}
