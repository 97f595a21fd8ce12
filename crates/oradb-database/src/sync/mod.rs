//! Resource synchronizer
//!
//! Makes the owned Kubernetes objects match the spec: services first, then
//! the data claim, then pods. Each pass issues only the writes needed to
//! close the observed gap.

pub mod pods;
pub mod pvc;
pub mod service;

pub use pods::{plan_pods, sync_pods, PodInventory, PodPlan, PodSync};
pub use service::{cluster_connect_string, external_connect_string, service_drift};

use kube::ResourceExt;

use oradb_common::crd::SingleInstanceDatabase;
use oradb_common::Error;

use crate::controller::Context;
use crate::templates::{cluster_service, data_claim, external_service};

/// One synchronizer pass over every owned object
pub async fn synchronize(db: &SingleInstanceDatabase, ctx: &Context) -> Result<PodSync, Error> {
    let ns = db.namespace().unwrap_or_default();
    let kube = ctx.kube.as_ref();

    service::ensure_service(kube, &ns, &cluster_service(db)).await?;
    service::ensure_service(kube, &ns, &external_service(db)).await?;
    if let Some(persistence) = &db.spec.persistence {
        pvc::ensure_claim(kube, &ns, &data_claim(db, persistence)).await?;
    }
    sync_pods(db, ctx).await
}
