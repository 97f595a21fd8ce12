//! Kubernetes helpers shared by the oradb controllers
//!
//! Finalizer bookkeeping, optimistic-concurrency status writes and secret
//! lookups. Controllers call these from their `KubeClient` implementations so
//! the reconcile logic itself stays mockable.

use std::fmt::Debug;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::retry::{retry_if, RetryConfig};
use crate::FIELD_MANAGER;

/// A namespaced custom resource with a typed status sub-resource.
///
/// The status type is what a controller computes on each pass and what
/// [`persist_status`] writes back; copying it onto a freshly fetched object
/// is a plain typed assignment.
pub trait StatusResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// Status sub-resource type
    type Status: Clone + Debug + Default + PartialEq + Serialize + Send + Sync;

    /// Status as stored on this object
    fn current_status(&self) -> Option<&Self::Status>;
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409)
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

/// Merge patch writing `status`, guarded by the resourceVersion of `obj`.
///
/// `obj` is the snapshot the status was computed from. Any write to the
/// object since that read makes the API server reject the patch with 409.
pub fn status_patch<K: StatusResource>(obj: &K, status: &K::Status) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": obj.resource_version() },
        "status": status,
    })
}

/// Write `status` computed from the snapshot `obj`.
///
/// A 409 is returned to the caller rather than retried here: re-reading and
/// resending would overwrite whatever another writer changed in between
/// (another controller clearing `dgBroker`, a switchover recording the new
/// role). The reconcile fails, and the next pass recomputes from fresh state.
pub async fn persist_status<K: StatusResource>(
    client: &Client,
    obj: &K,
    status: &K::Status,
) -> Result<(), kube::Error> {
    let name = obj.name_any();
    let api: Api<K> = Api::namespaced(client.clone(), &obj.namespace().unwrap_or_default());

    let result = api
        .patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch(obj, status)),
        )
        .await;
    match result {
        Err(e) if is_conflict(&e) => {
            debug!(name = %name, "status changed since read, write rejected");
            Err(e)
        }
        other => other.map(|_| ()),
    }
}

/// True when `obj` carries `finalizer`
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add `finalizer` to the named object if it is missing
pub async fn add_finalizer<K: StatusResource>(
    client: &Client,
    namespace: &str,
    name: &str,
    finalizer: &str,
) -> Result<(), kube::Error> {
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let api = &api;

    retry_if(&RetryConfig::metadata_write(), "add_finalizer", is_conflict, || async move {
        let obj = api.get(name).await?;
        if has_finalizer(&obj, finalizer) {
            return Ok(());
        }
        let mut finalizers = obj.finalizers().to_vec();
        finalizers.push(finalizer.to_string());
        patch_finalizers(api, name, &obj, finalizers).await
    })
    .await
}

/// Remove `finalizer` from the named object. An already-gone object is fine.
pub async fn remove_finalizer<K: StatusResource>(
    client: &Client,
    namespace: &str,
    name: &str,
    finalizer: &str,
) -> Result<(), kube::Error> {
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let api = &api;

    let result = retry_if(&RetryConfig::metadata_write(), "remove_finalizer", is_conflict, || async move {
        let obj = api.get(name).await?;
        if !has_finalizer(&obj, finalizer) {
            return Ok(());
        }
        let finalizers = obj
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();
        patch_finalizers(api, name, &obj, finalizers).await
    })
    .await;

    match result {
        Err(e) if is_not_found(&e) => Ok(()),
        other => other,
    }
}

/// Replace the finalizer list, guarded by the object's resourceVersion
async fn patch_finalizers<K: StatusResource>(
    api: &Api<K>,
    name: &str,
    obj: &K,
    finalizers: Vec<String>,
) -> Result<(), kube::Error> {
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": obj.resource_version(),
            "finalizers": finalizers
        }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Read one key of a Secret.
///
/// Returns `Ok(None)` when the secret or the key does not exist, leaving the
/// caller to decide whether that is a NotFound.
pub async fn read_secret_key(
    client: &Client,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<Option<Zeroizing<String>>, kube::Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = match api.get_opt(name).await? {
        Some(s) => s,
        None => return Ok(None),
    };
    let value = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|bytes| Zeroizing::new(String::from_utf8_lossy(&bytes.0).trim_end().to_string()));
    Ok(value)
}

/// Delete a Secret, ignoring one that is already gone
pub async fn delete_secret(client: &Client, namespace: &str, name: &str) -> Result<(), kube::Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PluggableDatabase, PluggableDatabaseSpec, PluggableDatabaseStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn sample_pdb_spec() -> PluggableDatabaseSpec {
        serde_json::from_value(serde_json::json!({
            "cdbResName": "cdb-dev",
            "pdbName": "pdbdev",
            "action": "Modify",
            "webServerUser": {"secretName": "ords", "secretKey": "user"},
            "webServerPwd": {"secretName": "ords", "secretKey": "pwd"}
        }))
        .unwrap()
    }

    #[test]
    fn finalizer_detection() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("s".to_string()),
                finalizers: Some(vec!["database.oradb.io/cleanup".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(has_finalizer(&secret, "database.oradb.io/cleanup"));
        assert!(!has_finalizer(&secret, "other"));
    }

    #[test]
    fn status_patch_carries_the_snapshot_version() {
        let mut pdb = PluggableDatabase::new("pdb1", sample_pdb_spec());
        pdb.metadata.namespace = Some("prod".to_string());
        pdb.metadata.resource_version = Some("41".to_string());
        let status = PluggableDatabaseStatus {
            open_mode: Some("READ WRITE".to_string()),
            ..Default::default()
        };

        let patch = status_patch(&pdb, &status);
        assert_eq!(patch["metadata"]["resourceVersion"], "41");
        assert_eq!(patch["status"]["openMode"], "READ WRITE");
    }

    /// A write based on an old read must not be resent with a newer
    /// resourceVersion; it surfaces as a transient conflict instead.
    #[test]
    fn stale_status_write_is_a_transient_conflict() {
        let err = crate::Error::from(api_error(409));
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn conflict_and_not_found_detection() {
        assert!(is_conflict(&api_error(409)));
        assert!(!is_conflict(&api_error(404)));
        assert!(is_not_found(&api_error(404)));
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: String::new(),
            reason: String::new(),
            code,
        })
    }
}
