//! Replica inventory, scaling and image rollout
//!
//! Pods are never patched. A scale change creates or deletes pods of the
//! current version; an image change brings up one pod of the new version,
//! waits for it to start, then retires the old ones. The pod currently
//! serving (`readyPod`) is never chosen for scale-in.

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use oradb_common::crd::SingleInstanceDatabase;
use oradb_common::events::{actions, reasons};
use oradb_common::{Error, LABEL_VERSION};

use crate::controller::Context;
use crate::error::DatabaseError;
use crate::templates::database_pod;

const PULL_FAILURES: &[&str] = &["ImagePullBackOff", "ErrImagePull", "InvalidImageName"];

/// True when the pod's database container reports ready
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    let phase_ok = matches!(status.phase.as_deref(), Some("Running") | Some("Pending"));
    phase_ok
        && status
            .container_statuses
            .as_ref()
            .is_some_and(|cs| cs.iter().any(|c| c.ready))
}

/// True when the pod phase is Running
pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

/// Waiting reason if the pod cannot pull its image
pub fn image_pull_failure(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.clone())
        .find(|r| PULL_FAILURES.contains(&r.as_str()))
}

fn version_of(pod: &Pod) -> Option<&str> {
    pod.labels().get(LABEL_VERSION).map(String::as_str)
}

/// Pods of one database, split by lifecycle
#[derive(Clone, Debug, Default)]
pub struct PodInventory {
    /// First ready pod by name, any version
    pub ready: Option<Pod>,
    /// Live pods of the requested version, including the ready one
    pub current: Vec<Pod>,
    /// Live pods of any other version
    pub stale: Vec<Pod>,
    /// Pods with a deletion timestamp
    pub terminating: Vec<Pod>,
}

impl PodInventory {
    /// Classify `pods` against the requested `version`
    pub fn new(mut pods: Vec<Pod>, version: &str) -> Self {
        pods.sort_by_key(|p| p.name_any());
        let mut inv = Self::default();
        for pod in pods {
            if pod.metadata.deletion_timestamp.is_some() {
                inv.terminating.push(pod);
                continue;
            }
            if inv.ready.is_none() && is_pod_ready(&pod) {
                inv.ready = Some(pod.clone());
            }
            if version_of(&pod) == Some(version) {
                inv.current.push(pod);
            } else {
                inv.stale.push(pod);
            }
        }
        inv
    }

    /// Replicas of the requested version that exist
    pub fn replicas_found(&self) -> usize {
        self.current.len()
    }

    /// Name of the serving pod
    pub fn ready_pod_name(&self) -> Option<String> {
        self.ready.as_ref().map(|p| p.name_any())
    }

    /// First pod of the requested version that cannot pull its image
    pub fn pull_failure(&self) -> Option<(String, String)> {
        self.current
            .iter()
            .find_map(|p| image_pull_failure(p).map(|r| (p.name_any(), r)))
    }
}

/// Mutations needed to converge the replica set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodPlan {
    /// Pods stuck terminating, deleted with grace period 0
    pub force_delete: Vec<String>,
    /// Pods to delete gracefully
    pub delete: Vec<String>,
    /// Pods of the requested version to create
    pub create: usize,
    /// Why the replica set is not converged yet
    pub waiting: Option<String>,
    /// The plan retires an older image
    pub rollout: bool,
}

impl PodPlan {
    /// True when nothing needs to change
    pub fn is_noop(&self) -> bool {
        self.force_delete.is_empty() && self.delete.is_empty() && self.create == 0
    }
}

/// Pods to remove when shrinking to `desired`.
///
/// The ready pod is never a victim. Among the rest, pods that are not
/// running go first, then by name descending.
pub fn scale_in_victims(current: &[Pod], ready: Option<&str>, desired: usize) -> Vec<String> {
    let excess = current.len().saturating_sub(desired);
    let mut candidates: Vec<&Pod> = current
        .iter()
        .filter(|p| Some(p.name_any().as_str()) != ready)
        .collect();
    candidates.sort_by(|a, b| {
        is_pod_running(a)
            .cmp(&is_pod_running(b))
            .then_with(|| b.name_any().cmp(&a.name_any()))
    });
    candidates
        .into_iter()
        .take(excess)
        .map(|p| p.name_any())
        .collect()
}

/// Decide the next mutations for `inv` at `desired` replicas
pub fn plan_pods(inv: &PodInventory, desired: usize) -> PodPlan {
    if !inv.terminating.is_empty() {
        // Replacements wait until old pods are gone from the API.
        return PodPlan {
            force_delete: inv.terminating.iter().map(|p| p.name_any()).collect(),
            waiting: Some(format!("{} pods terminating", inv.terminating.len())),
            ..Default::default()
        };
    }

    if !inv.stale.is_empty() {
        if inv.current.is_empty() {
            return PodPlan {
                create: 1,
                waiting: Some("starting first pod of the new image".to_string()),
                rollout: true,
                ..Default::default()
            };
        }
        if !inv.current.iter().any(is_pod_running) {
            return PodPlan {
                waiting: Some("waiting for new image pod to start".to_string()),
                rollout: true,
                ..Default::default()
            };
        }
        return PodPlan {
            delete: inv.stale.iter().map(|p| p.name_any()).collect(),
            waiting: Some(format!("retiring {} pods of the previous image", inv.stale.len())),
            rollout: true,
            ..Default::default()
        };
    }

    let found = inv.replicas_found();
    let ready = inv.ready_pod_name();
    PodPlan {
        create: desired.saturating_sub(found),
        delete: scale_in_victims(&inv.current, ready.as_deref(), desired),
        ..Default::default()
    }
}

/// Outcome of one pod synchronization pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodSync {
    /// The replica set matches the spec
    Converged,
    /// Mutations were issued or are pending; check again later
    Progressing(String),
}

/// Converge the pods of `db` one step
pub async fn sync_pods(db: &SingleInstanceDatabase, ctx: &Context) -> Result<PodSync, Error> {
    let name = db.name_any();
    let ns = db.namespace().unwrap_or_default();
    let version = db.spec.image.version_label();
    let desired = db.spec.replicas.max(1) as usize;

    let inv = PodInventory::new(ctx.kube.list_pods(&ns, &name).await?, &version);

    if let Some((pod, reason)) = inv.pull_failure() {
        warn!(pod = %pod, reason = %reason, "deleting pod that cannot pull its image");
        ctx.kube.delete_pod(&ns, &pod, true).await?;
        return Err(DatabaseError::ImagePull {
            pod,
            image: db.spec.image.pull_from.clone(),
            reason,
        }
        .into());
    }

    let plan = plan_pods(&inv, desired);
    if plan.is_noop() {
        return Ok(match plan.waiting {
            Some(msg) => PodSync::Progressing(msg),
            None => PodSync::Converged,
        });
    }
    debug!(?plan, "pod plan");

    for pod in &plan.force_delete {
        ctx.kube.delete_pod(&ns, pod, true).await?;
    }
    for pod in &plan.delete {
        info!(pod = %pod, "deleting pod");
        ctx.kube.delete_pod(&ns, pod, false).await?;
    }
    if plan.create > 0 {
        let template = database_pod(db);
        for _ in 0..plan.create {
            ctx.kube.create_pod(&ns, &template).await?;
        }
        info!(count = plan.create, version = %version, "created pods");
    }

    let (reason, action, note) = if plan.rollout {
        (
            reasons::IMAGE_UPDATE_STARTED,
            actions::UPDATE,
            format!("Rolling pods to image version {version}"),
        )
    } else {
        (
            reasons::SCALING,
            actions::SCALE,
            format!("Scaling from {} to {desired} replicas", inv.replicas_found()),
        )
    };
    if plan.create > 0 || !plan.delete.is_empty() {
        ctx.events
            .publish(&db.object_ref(&()), EventType::Normal, reason, action, Some(note))
            .await;
    }

    Ok(match plan.waiting {
        Some(msg) => PodSync::Progressing(msg),
        None if plan.create > 0 => PodSync::Progressing(format!("created {} pods", plan.create)),
        None => PodSync::Converged,
    })
}
