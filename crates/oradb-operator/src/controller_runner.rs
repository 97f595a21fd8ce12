//! Controller runner - builds controller futures for each resource kind
//!
//! Each `build_*` function returns a boxed future that runs one
//! `kube::runtime::Controller` until a shutdown signal arrives. The
//! controller queue already serializes reconciles of one key; `concurrency`
//! bounds how many different keys run at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::runtime::controller::Config as ControllerRuntimeConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};

use oradb_common::crd::{DataguardBroker, PluggableDatabase, SingleInstanceDatabase};
use oradb_common::ControllerConfig;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Api scoped to the watched namespace, or cluster-wide
fn scoped_api<K>(client: &Client, config: &ControllerConfig) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn runtime_config(config: &ControllerConfig) -> ControllerRuntimeConfig {
    ControllerRuntimeConfig::default().concurrency(config.concurrency)
}

/// Build the SingleInstanceDatabase controller
pub fn build_database_controller(client: Client, config: ControllerConfig) -> ControllerFuture {
    let databases: Api<SingleInstanceDatabase> = scoped_api(&client, &config);
    let pods: Api<Pod> = scoped_api(&client, &config);
    let services: Api<Service> = scoped_api(&client, &config);
    let claims: Api<PersistentVolumeClaim> = scoped_api(&client, &config);

    let ctx = Arc::new(
        oradb_database::Context::builder(client)
            .config(config.clone())
            .build(),
    );

    tracing::info!("- SingleInstanceDatabase controller");
    Box::pin(
        Controller::new(databases, watcher_config())
            .with_config(runtime_config(&config))
            .owns(pods, watcher_config())
            .owns(services, watcher_config())
            .owns(claims, watcher_config())
            .shutdown_on_signal()
            .run(
                oradb_database::reconcile,
                oradb_database::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("SingleInstanceDatabase")),
    )
}

/// Brokers in the database's namespace that list it as primary or standby
fn brokers_of(
    brokers: &[Arc<DataguardBroker>],
    db: &SingleInstanceDatabase,
) -> Vec<ObjectRef<DataguardBroker>> {
    let name = db.name_any();
    let ns = db.namespace();
    brokers
        .iter()
        .filter(|b| b.namespace() == ns)
        .filter(|b| {
            b.spec.primary_database_ref == name
                || b.spec.standby_database_refs.iter().any(|s| s == &name)
        })
        .map(|b| ObjectRef::from_obj(b.as_ref()))
        .collect()
}

/// Build the DataguardBroker controller
///
/// Member database changes (readiness, role) trigger a pass of every broker
/// that names the database. The observer pod is owned by its broker.
pub fn build_broker_controller(client: Client, config: ControllerConfig) -> ControllerFuture {
    let brokers: Api<DataguardBroker> = scoped_api(&client, &config);
    let databases: Api<SingleInstanceDatabase> = scoped_api(&client, &config);
    let services: Api<Service> = scoped_api(&client, &config);
    let pods: Api<Pod> = scoped_api(&client, &config);

    let ctx = Arc::new(
        oradb_dataguard::Context::builder(client)
            .config(config.clone())
            .build(),
    );

    let controller = Controller::new(brokers, watcher_config());
    let store = controller.store();

    tracing::info!("- DataguardBroker controller");
    Box::pin(
        controller
            .with_config(runtime_config(&config))
            .owns(services, watcher_config())
            .owns(pods, watcher_config())
            .watches(databases, watcher_config(), move |db| {
                let affected = brokers_of(&store.state(), &db);
                tracing::debug!(
                    database = %db.name_any(),
                    affected_count = affected.len(),
                    "Triggering re-reconciliation of brokers"
                );
                affected
            })
            .shutdown_on_signal()
            .run(
                oradb_dataguard::reconcile,
                oradb_dataguard::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("DataguardBroker")),
    )
}

/// Build the PluggableDatabase controller
pub fn build_pdb_controller(client: Client, config: ControllerConfig) -> ControllerFuture {
    let pdbs: Api<PluggableDatabase> = scoped_api(&client, &config);
    let ctx = Arc::new(
        oradb_pdb::Context::builder(client)
            .config(config.clone())
            .build(),
    );

    tracing::info!("- PluggableDatabase controller");
    Box::pin(
        Controller::new(pdbs, watcher_config())
            .with_config(runtime_config(&config))
            .shutdown_on_signal()
            .run(oradb_pdb::reconcile, oradb_pdb::error_policy, ctx)
            .for_each(log_reconcile_result("PluggableDatabase")),
    )
}

/// Every controller the operator runs
pub fn build_all(client: Client, config: ControllerConfig) -> Vec<ControllerFuture> {
    vec![
        build_database_controller(client.clone(), config.clone()),
        build_broker_controller(client.clone(), config.clone()),
        build_pdb_controller(client, config),
    ]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oradb_common::crd::DataguardBrokerSpec;

    fn broker(name: &str, ns: &str, primary: &str, standbys: &[&str]) -> Arc<DataguardBroker> {
        let spec: DataguardBrokerSpec = serde_json::from_value(serde_json::json!({
            "primaryDatabaseRef": primary,
            "standbyDatabaseRefs": standbys,
        }))
        .unwrap();
        let mut b = DataguardBroker::new(name, spec);
        b.metadata.namespace = Some(ns.to_string());
        Arc::new(b)
    }

    fn database(name: &str, ns: &str) -> SingleInstanceDatabase {
        let mut db: SingleInstanceDatabase = serde_json::from_value(serde_json::json!({
            "apiVersion": "database.oradb.io/v1alpha1",
            "kind": "SingleInstanceDatabase",
            "metadata": {"name": name},
            "spec": {
                "sid": "ORCL1",
                "image": {"pullFrom": "container-registry.oracle.com/database/enterprise:21.3.0.0"},
                "adminPassword": {"secretName": "admin"}
            }
        }))
        .unwrap();
        db.metadata.namespace = Some(ns.to_string());
        db
    }

    #[test]
    fn member_changes_map_to_brokers_naming_them() {
        let brokers = vec![
            broker("dg-a", "prod", "sidb1", &["sidb2"]),
            broker("dg-b", "prod", "sidb3", &["sidb1"]),
            broker("dg-c", "prod", "sidb4", &["sidb5"]),
            broker("dg-d", "dev", "sidb1", &[]),
        ];

        let names: Vec<String> = brokers_of(&brokers, &database("sidb1", "prod"))
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["dg-a", "dg-b"]);
        assert!(brokers_of(&brokers, &database("sidb9", "prod")).is_empty());
    }
}
