//! Desired-state builders for the objects a database owns
//!
//! Pods are created with `generateName` and never updated in place; a new
//! image means new pods. Services and claims are diffed and patched by the
//! synchronizer.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, ExecAction,
    LocalObjectReference, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec, Probe, SecretKeySelector,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use oradb_common::crd::{DataguardBroker, PersistenceSpec, SingleInstanceDatabase};
use oradb_common::{
    LABEL_APP, LABEL_MANAGED_BY, LABEL_VERSION, LISTENER_PORT, MANAGED_BY_VALUE, XMLDB_PORT,
};
use oradb_exec::command::MARKER_PATH;
use oradb_exec::executor::DATABASE_CONTAINER;

/// Uid/gid the database image runs as
const ORACLE_UID: i64 = 54321;
/// Group owning the data volume
const DBA_GID: i64 = 54322;

const DATA_VOLUME: &str = "datamount";
const DATA_MOUNT_PATH: &str = "/opt/oracle/oradata";

/// Service type for externally reachable endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    /// In-cluster only
    ClusterIp,
    /// Cloud load balancer
    LoadBalancer,
    /// Port on every node
    NodePort,
}

impl ServiceKind {
    /// External kind chosen by a `loadBalancer` flag
    pub fn external(load_balancer: bool) -> Self {
        if load_balancer {
            Self::LoadBalancer
        } else {
            Self::NodePort
        }
    }

    /// Value of `spec.type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterIp => "ClusterIP",
            Self::LoadBalancer => "LoadBalancer",
            Self::NodePort => "NodePort",
        }
    }
}

/// Labels every pod of `name` carries
pub fn pod_labels(name: &str, version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), name.to_string()),
        (LABEL_VERSION.to_string(), version.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Name of the external service of a database
pub fn external_service_name(name: &str) -> String {
    format!("{name}-ext")
}

fn owner_refs<K: Resource<DynamicType = ()>>(owner: &K) -> Option<Vec<OwnerReference>> {
    owner.controller_owner_ref(&()).map(|r| vec![r])
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Readiness check that passes while the marker exists so a planned
/// restart does not pull the pod out of its service.
fn readiness_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!(
                    "if [ -f \"{MARKER_PATH}\" ]; then exit 0; fi; $ORACLE_BASE/checkDBStatus.sh"
                ),
            ]),
        }),
        initial_delay_seconds: Some(20),
        period_seconds: Some(40),
        timeout_seconds: Some(20),
        ..Default::default()
    }
}

/// Pod for one replica of `db`
pub fn database_pod(db: &SingleInstanceDatabase) -> Pod {
    let name = db.name_any();
    let spec = &db.spec;
    let version = spec.image.version_label();

    let mut envs = vec![
        env("ORACLE_SID", spec.sid_upper()),
        env("ORACLE_EDITION", spec.edition.to_string()),
        EnvVar {
            name: "ORACLE_PWD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: spec.admin_password.secret_name.clone(),
                    key: spec.admin_password.secret_key.clone(),
                    optional: Some(true),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if let Some(pdb) = &spec.pdb_name {
        envs.push(env("ORACLE_PDB", pdb.clone()));
    }
    if let Some(charset) = &spec.charset {
        envs.push(env("ORACLE_CHARACTERSET", charset.clone()));
    }
    if let Some(params) = &spec.init_params {
        if let Some(sga) = params.sga_target {
            envs.push(env("INIT_SGA_SIZE", sga.to_string()));
        }
        if let Some(pga) = params.pga_aggregate_target {
            envs.push(env("INIT_PGA_SIZE", pga.to_string()));
        }
    }

    let data_volume = match &spec.persistence {
        Some(_) => Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: name.clone(),
                read_only: None,
            }),
            ..Default::default()
        },
        None => Volume {
            name: DATA_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    };

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{name}-")),
            namespace: db.namespace(),
            labels: Some(pod_labels(&name, &version)),
            owner_references: owner_refs(db),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: DATABASE_CONTAINER.to_string(),
                image: Some(spec.image.pull_from.clone()),
                env: Some(envs),
                ports: Some(vec![
                    ContainerPort {
                        container_port: LISTENER_PORT,
                        name: Some("listener".to_string()),
                        ..Default::default()
                    },
                    ContainerPort {
                        container_port: XMLDB_PORT,
                        name: Some("xmldb".to_string()),
                        ..Default::default()
                    },
                ]),
                readiness_probe: Some(readiness_probe()),
                volume_mounts: Some(vec![VolumeMount {
                    name: DATA_VOLUME.to_string(),
                    mount_path: DATA_MOUNT_PATH.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![data_volume]),
            security_context: Some(PodSecurityContext {
                run_as_user: Some(ORACLE_UID),
                run_as_group: Some(ORACLE_UID),
                fs_group: Some(DBA_GID),
                ..Default::default()
            }),
            node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
            image_pull_secrets: spec.image.pull_secrets.as_ref().map(|s| {
                vec![LocalObjectReference {
                    name: s.clone(),
                }]
            }),
            termination_grace_period_seconds: Some(30),
            ..Default::default()
        }),
        status: None,
    }
}

/// Name of the fast-start failover observer pod of a broker
pub fn observer_pod_name(broker: &str) -> String {
    format!("{broker}-observer")
}

/// Fast-start failover observer for `broker`, watching `primary`.
///
/// Runs the database image in observer-only mode. The SID is only used by
/// the image's locking scripts and must not collide with a real member.
pub fn observer_pod(broker: &DataguardBroker, primary: &SingleInstanceDatabase) -> Pod {
    let name = broker.name_any();
    let pod_name = observer_pod_name(&name);
    let spec = &primary.spec;
    let sid = spec.sid_upper();

    let envs = vec![
        env("DG_OBSERVER_ONLY", "true"),
        env("DG_OBSERVER_NAME", name.clone()),
        env(
            "PRIMARY_DB_CONN_STR",
            format!("{}:{LISTENER_PORT}/{sid}", primary.name_any()),
        ),
        env("ORACLE_SID", format!("OBSRVR{sid}")),
        EnvVar {
            name: "ORACLE_PWD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: spec.admin_password.secret_name.clone(),
                    key: spec.admin_password.secret_key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.clone()),
            namespace: broker.namespace(),
            labels: Some(pod_labels(&pod_name, &spec.image.version_label())),
            owner_references: owner_refs(broker),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: DATABASE_CONTAINER.to_string(),
                image: Some(spec.image.pull_from.clone()),
                env: Some(envs),
                ..Default::default()
            }],
            security_context: Some(PodSecurityContext {
                run_as_user: Some(ORACLE_UID),
                run_as_group: Some(ORACLE_UID),
                fs_group: Some(ORACLE_UID),
                ..Default::default()
            }),
            node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
            image_pull_secrets: spec.image.pull_secrets.as_ref().map(|s| {
                vec![LocalObjectReference {
                    name: s.clone(),
                }]
            }),
            termination_grace_period_seconds: Some(30),
            ..Default::default()
        }),
        status: None,
    }
}

/// Service exposing the listener and XML DB ports of pods labelled `app=<selector_app>`.
///
/// Also used for the broker endpoint, which selects the current primary.
pub fn database_service<K: Resource<DynamicType = ()>>(
    owner: &K,
    name: &str,
    selector_app: &str,
    kind: ServiceKind,
    annotations: &BTreeMap<String, String>,
) -> Service {
    let port = |name: &str, port: i32| ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: owner.meta().namespace.clone(),
            labels: Some(BTreeMap::from([
                (LABEL_APP.to_string(), selector_app.to_string()),
                (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
            ])),
            annotations: (!annotations.is_empty()).then(|| annotations.clone()),
            owner_references: owner_refs(owner),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(kind.as_str().to_string()),
            selector: Some(BTreeMap::from([(
                LABEL_APP.to_string(),
                selector_app.to_string(),
            )])),
            ports: Some(vec![port("listener", LISTENER_PORT), port("xmldb", XMLDB_PORT)]),
            ..Default::default()
        }),
        status: None,
    }
}

/// In-cluster service of `db`
pub fn cluster_service(db: &SingleInstanceDatabase) -> Service {
    let name = db.name_any();
    database_service(db, &name, &name, ServiceKind::ClusterIp, &BTreeMap::new())
}

/// External service of `db`
pub fn external_service(db: &SingleInstanceDatabase) -> Service {
    let name = db.name_any();
    database_service(
        db,
        &external_service_name(&name),
        &name,
        ServiceKind::external(db.spec.load_balancer),
        &db.spec.service_annotations,
    )
}

/// Claim holding the datafiles of `db`
pub fn data_claim(db: &SingleInstanceDatabase, persistence: &PersistenceSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(db.name_any()),
            namespace: db.namespace(),
            labels: Some(BTreeMap::from([
                (LABEL_APP.to_string(), db.name_any()),
                (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
            ])),
            owner_references: owner_refs(db),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![persistence.access_mode.clone()]),
            storage_class_name: persistence.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(persistence.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}
