//! Data volume claim synchronization

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tracing::info;

use oradb_common::Error;

use crate::controller::KubeClient;
use crate::error::DatabaseError;

fn requested_size(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
        .map(|q| q.0.as_str())
}

/// Compare a live claim with the desired one.
///
/// Storage class and access modes are fixed once bound; a change is a spec
/// error. Returns true when only the requested size differs.
pub fn claim_needs_resize(
    existing: &PersistentVolumeClaim,
    desired: &PersistentVolumeClaim,
) -> Result<bool, DatabaseError> {
    let claim = desired.metadata.name.clone().unwrap_or_default();
    let (have, want) = match (existing.spec.as_ref(), desired.spec.as_ref()) {
        (Some(h), Some(w)) => (h, w),
        _ => return Ok(false),
    };

    if want.storage_class_name.is_some() && have.storage_class_name != want.storage_class_name {
        return Err(DatabaseError::VolumeMismatch {
            claim,
            what: "storage class",
        });
    }
    if have.access_modes != want.access_modes {
        return Err(DatabaseError::VolumeMismatch {
            claim,
            what: "access mode",
        });
    }
    Ok(requested_size(existing) != requested_size(desired))
}

/// Create the claim or grow it to the requested size
pub async fn ensure_claim(
    kube: &dyn KubeClient,
    namespace: &str,
    desired: &PersistentVolumeClaim,
) -> Result<bool, Error> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    match kube.get_pvc(namespace, &name).await? {
        Some(existing) => {
            if !claim_needs_resize(&existing, desired)? {
                return Ok(false);
            }
            info!(claim = %name, size = ?requested_size(desired), "resizing claim");
        }
        None => info!(claim = %name, "creating claim"),
    }
    kube.apply_pvc(namespace, desired).await?;
    Ok(true)
}
