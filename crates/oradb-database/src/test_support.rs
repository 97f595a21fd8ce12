//! Fixtures shared by the controller, phase and synchronizer tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use mockall::mock;

use oradb_common::crd::{
    AdminPasswordSpec, Edition, ImageSpec, PersistenceSpec, SingleInstanceDatabase,
    SingleInstanceDatabaseSpec,
};
use oradb_common::{LABEL_APP, LABEL_VERSION};
use oradb_exec::{Command, CommandOutput, ExecError, PodExecutor, PodRef};

// The mockall-generated mock for PodExecutor only exists inside
// oradb-exec's own test build.
mock! {
    pub Executor {}

    #[async_trait::async_trait]
    impl PodExecutor for Executor {
        async fn exec(&self, pod: &PodRef, command: &Command) -> Result<CommandOutput, ExecError>;
    }
}

pub const IMAGE: &str = "container-registry.example.com/database/enterprise:21.3.0.0";

pub fn sample_db(name: &str) -> SingleInstanceDatabase {
    let mut db = SingleInstanceDatabase::new(
        name,
        SingleInstanceDatabaseSpec {
            sid: "ORCL1".to_string(),
            edition: Edition::Enterprise,
            charset: None,
            pdb_name: Some("ORCLPDB1".to_string()),
            replicas: 1,
            image: ImageSpec {
                pull_from: IMAGE.to_string(),
                version: None,
                pull_secrets: None,
                prebuilt_db: false,
            },
            admin_password: AdminPasswordSpec {
                secret_name: format!("{name}-admin"),
                secret_key: "oracle_pwd".to_string(),
                keep_secret: false,
            },
            persistence: Some(PersistenceSpec {
                size: "100Gi".to_string(),
                storage_class: None,
                access_mode: "ReadWriteMany".to_string(),
            }),
            load_balancer: false,
            service_annotations: BTreeMap::new(),
            node_selector: BTreeMap::new(),
            flash_back: None,
            archive_log: None,
            force_log: None,
            init_params: None,
        },
    );
    db.metadata.namespace = Some("prod".to_string());
    db.metadata.uid = Some(format!("uid-{name}"));
    db.metadata.generation = Some(1);
    db.metadata.finalizers = Some(vec![crate::controller::DATABASE_FINALIZER.to_string()]);
    db
}

/// A pod of `app` at `version` in the given phase
pub fn pod(app: &str, name: &str, version: &str, phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("prod".to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_APP.to_string(), app.to_string()),
                (LABEL_VERSION.to_string(), version.to_string()),
            ])),
            ..Default::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            host_ip: Some("10.0.0.7".to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "oracle".to_string(),
                ready,
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub fn ready_pod(app: &str, name: &str) -> Pod {
    pod(app, name, "21.3.0.0", "Running", true)
}

pub fn terminating(mut pod: Pod) -> Pod {
    pod.metadata.deletion_timestamp = Some(Time(chrono_now()));
    pod
}

pub fn pull_failing(mut pod: Pod, reason: &str) -> Pod {
    if let Some(statuses) = pod
        .status
        .as_mut()
        .and_then(|s| s.container_statuses.as_mut())
    {
        statuses[0].state = Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                message: None,
            }),
            ..Default::default()
        });
    }
    pod
}

fn chrono_now() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
    k8s_openapi::chrono::Utc::now()
}

/// Executor answering from a fixed script and recording every command
pub struct Scripted {
    pub calls: Arc<Mutex<Vec<Command>>>,
}

impl Scripted {
    /// Build a mock whose answers come from `respond`
    pub fn executor<F>(respond: F) -> (MockExecutor, Self)
    where
        F: Fn(&PodRef, &Command) -> Result<CommandOutput, ExecError> + Send + Sync + 'static,
    {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = calls.clone();
        let mut exec = MockExecutor::new();
        exec.expect_exec().returning(move |pod, cmd| {
            c.lock().unwrap().push(cmd.clone());
            respond(pod, cmd)
        });
        (exec, Self { calls })
    }

    pub fn mutating(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_mutating())
            .map(|c| c.redacted())
            .collect()
    }

    pub fn redacted(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.redacted()).collect()
    }
}
