//! Service synchronization and connect strings
//!
//! Services are compared field by field against the desired object and only
//! applied when something that matters differs. Values the API server fills
//! in (cluster IP, node ports) are ignored.

use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info};

use oradb_common::{Error, LISTENER_PORT};

use crate::controller::KubeClient;

/// Fields of `existing` that differ from `desired`
pub fn service_drift(existing: &Service, desired: &Service) -> Vec<&'static str> {
    let mut drift = Vec::new();
    let (Some(have), Some(want)) = (existing.spec.as_ref(), desired.spec.as_ref()) else {
        return vec!["spec"];
    };

    if have.type_.as_deref().unwrap_or("ClusterIP") != want.type_.as_deref().unwrap_or("ClusterIP")
    {
        drift.push("type");
    }
    if have.selector != want.selector {
        drift.push("selector");
    }

    let ports = |s: &k8s_openapi::api::core::v1::ServiceSpec| {
        let mut p: Vec<(Option<String>, i32)> = s
            .ports
            .iter()
            .flatten()
            .map(|p| (p.name.clone(), p.port))
            .collect();
        p.sort();
        p
    };
    if ports(have) != ports(want) {
        drift.push("ports");
    }

    let have_annotations = existing.metadata.annotations.clone().unwrap_or_default();
    let annotations_match = desired
        .metadata
        .annotations
        .iter()
        .flatten()
        .all(|(k, v)| have_annotations.get(k) == Some(v));
    if !annotations_match {
        drift.push("annotations");
    }

    drift
}

/// Create `desired` or bring the existing service in line with it.
///
/// Returns true when a write was issued.
pub async fn ensure_service(
    kube: &dyn KubeClient,
    namespace: &str,
    desired: &Service,
) -> Result<bool, Error> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    match kube.get_service(namespace, &name).await? {
        Some(existing) => {
            let drift = service_drift(&existing, desired);
            if drift.is_empty() {
                debug!(service = %name, "service up to date");
                return Ok(false);
            }
            info!(service = %name, ?drift, "updating service");
        }
        None => info!(service = %name, "creating service"),
    }
    kube.apply_service(namespace, desired).await?;
    Ok(true)
}

/// `<name>.<namespace>:1521/<service_name>`
pub fn cluster_connect_string(svc: &str, namespace: &str, service_name: &str) -> String {
    format!("{svc}.{namespace}:{LISTENER_PORT}/{service_name}")
}

/// Externally reachable connect string for `svc`, if an address is known.
///
/// Load balancers use their ingress address and the listener port. Node
/// ports use `node_ip` and the allocated node port.
pub fn external_connect_string(
    svc: &Service,
    node_ip: Option<&str>,
    service_name: &str,
) -> Option<String> {
    let spec = svc.spec.as_ref()?;
    match spec.type_.as_deref() {
        Some("LoadBalancer") => {
            let ingress = svc
                .status
                .as_ref()?
                .load_balancer
                .as_ref()?
                .ingress
                .as_ref()?
                .first()?;
            let host = ingress.ip.clone().or_else(|| ingress.hostname.clone())?;
            Some(format!("{host}:{LISTENER_PORT}/{service_name}"))
        }
        Some("NodePort") => {
            let node_port = spec
                .ports
                .iter()
                .flatten()
                .find(|p| p.port == LISTENER_PORT)?
                .node_port?;
            Some(format!("{}:{node_port}/{service_name}", node_ip?))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockKubeClient;
    use crate::templates::{cluster_service, external_service};
    use crate::test_support::sample_db;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

    #[test]
    fn server_assigned_fields_are_not_drift() {
        let db = sample_db("orcl1");
        let desired = external_service(&db);
        let mut live = desired.clone();
        let spec = live.spec.as_mut().unwrap();
        spec.cluster_ip = Some("10.96.0.12".to_string());
        for p in spec.ports.as_mut().unwrap() {
            p.node_port = Some(31521);
        }
        live.metadata.annotations = Some([("extra".to_string(), "x".to_string())].into());
        assert!(service_drift(&live, &desired).is_empty());
    }

    #[test]
    fn selector_and_type_changes_are_drift() {
        let mut db = sample_db("orcl1");
        let live = external_service(&db);
        db.spec.load_balancer = true;
        let desired = external_service(&db);
        assert_eq!(service_drift(&live, &desired), vec!["type"]);

        let mut moved = live.clone();
        moved.spec.as_mut().unwrap().selector =
            Some([("app".to_string(), "orcl2".to_string())].into());
        assert_eq!(service_drift(&moved, &live), vec!["selector"]);
    }

    #[tokio::test]
    async fn up_to_date_service_is_not_written() {
        let db = sample_db("orcl1");
        let desired = cluster_service(&db);
        let live = desired.clone();

        let mut kube = MockKubeClient::new();
        kube.expect_get_service()
            .returning(move |_, _| Ok(Some(live.clone())));
        kube.expect_apply_service().never();

        assert!(!ensure_service(&kube, "prod", &desired).await.unwrap());
    }

    #[tokio::test]
    async fn missing_service_is_created() {
        let db = sample_db("orcl1");
        let desired = cluster_service(&db);

        let mut kube = MockKubeClient::new();
        kube.expect_get_service().returning(|_, _| Ok(None));
        kube.expect_apply_service().times(1).returning(|_, _| Ok(()));

        assert!(ensure_service(&kube, "prod", &desired).await.unwrap());
    }

    #[test]
    fn connect_strings() {
        assert_eq!(
            cluster_connect_string("orcl1", "prod", "ORCLPDB1"),
            "orcl1.prod:1521/ORCLPDB1"
        );

        let db = sample_db("orcl1");
        let mut svc = external_service(&db);
        for p in svc.spec.as_mut().unwrap().ports.as_mut().unwrap() {
            if p.port == 1521 {
                p.node_port = Some(31521);
            }
        }
        assert_eq!(
            external_connect_string(&svc, Some("10.0.0.7"), "ORCLPDB1").as_deref(),
            Some("10.0.0.7:31521/ORCLPDB1")
        );
        assert_eq!(external_connect_string(&svc, None, "ORCLPDB1"), None);

        svc.spec.as_mut().unwrap().type_ = Some("LoadBalancer".to_string());
        assert_eq!(external_connect_string(&svc, None, "DATAGUARD"), None);
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some("203.0.113.10".to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        assert_eq!(
            external_connect_string(&svc, None, "DATAGUARD").as_deref(),
            Some("203.0.113.10:1521/DATAGUARD")
        );
    }
}
