//! SingleInstanceDatabase controller implementation
//!
//! Observe, decide, act: each pass builds a working copy of the status,
//! runs the phase handlers against it and writes it back once at the end,
//! whatever the outcome. The condition reporter sets exactly one
//! `Reconcile*` condition per pass.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use oradb_common::conditions::{set_reconcile_condition, ReconcileOutcome};
use oradb_common::crd::{
    DatabasePhase, HealthStatus, SingleInstanceDatabase, SingleInstanceDatabaseStatus,
};
use oradb_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use oradb_common::kube_utils::{self, has_finalizer};
use oradb_common::{ControllerConfig, Error, ErrorClass, FIELD_MANAGER, LABEL_APP};
use oradb_exec::{KubePodExecutor, PodExecutor};

use crate::phases::{drive, Outcome};

/// Finalizer guarding pod and secret cleanup
pub const DATABASE_FINALIZER: &str = "database.oradb.io/cleanup";

/// Trait abstracting Kubernetes client operations for SingleInstanceDatabase
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Write a status computed from the snapshot `db`.
    ///
    /// Fails with a 409 when `db` was modified after it was read.
    async fn patch_status(
        &self,
        db: &SingleInstanceDatabase,
        status: &SingleInstanceDatabaseStatus,
    ) -> Result<(), Error>;

    /// Add the cleanup finalizer
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Remove the cleanup finalizer
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Read one key of a Secret; `None` if the secret or key is missing
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Zeroizing<String>>, Error>;

    /// Delete a Secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List pods labelled `app=<app>`
    async fn list_pods(&self, namespace: &str, app: &str) -> Result<Vec<Pod>, Error>;

    /// Create a pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error>;

    /// Delete a pod; `force` uses a zero grace period
    async fn delete_pod(&self, namespace: &str, name: &str, force: bool) -> Result<(), Error>;

    /// Get a Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create or update a Service with server-side apply
    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<(), Error>;

    /// Get a PersistentVolumeClaim
    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;

    /// Create or update a PersistentVolumeClaim with server-side apply
    async fn apply_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn ignore_not_found(result: Result<(), kube::Error>) -> Result<(), Error> {
    match result {
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        other => other.map_err(Error::from),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        db: &SingleInstanceDatabase,
        status: &SingleInstanceDatabaseStatus,
    ) -> Result<(), Error> {
        kube_utils::persist_status(&self.client, db, status).await?;
        Ok(())
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        kube_utils::add_finalizer::<SingleInstanceDatabase>(
            &self.client,
            namespace,
            name,
            DATABASE_FINALIZER,
        )
        .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        kube_utils::remove_finalizer::<SingleInstanceDatabase>(
            &self.client,
            namespace,
            name,
            DATABASE_FINALIZER,
        )
        .await?;
        Ok(())
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Zeroizing<String>>, Error> {
        Ok(kube_utils::read_secret_key(&self.client, namespace, name, key).await?)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), Error> {
        kube_utils::delete_secret(&self.client, namespace, name).await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, app: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(&format!("{LABEL_APP}={app}")))
            .await?;
        Ok(pods.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), pod).await?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str, force: bool) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = if force {
            DeleteParams::default().grace_period(0)
        } else {
            DeleteParams::default()
        };
        ignore_not_found(api.delete(name, &params).await.map(|_| ()))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<(), Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let name = service.name_any();
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(service),
        )
        .await?;
        Ok(())
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_pvc(&self, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<(), Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let name = pvc.name_any();
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(pvc))
            .await?;
        Ok(())
    }
}

/// Controller context shared by every reconcile of a SingleInstanceDatabase
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .config(config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Command transport into database pods
    pub executor: Arc<dyn PodExecutor>,
    /// Event publisher for Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Requeue intervals, marker TTL and concurrency
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, executor: Arc<dyn PodExecutor>) -> Self {
        Self {
            kube,
            executor,
            events: Arc::new(oradb_common::events::NoopEventPublisher),
            config: ControllerConfig::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    executor: Option<Arc<dyn PodExecutor>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            executor: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the pod executor (primarily for testing)
    pub fn executor(mut self, executor: Arc<dyn PodExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(KubePodExecutor::new(self.client.clone()))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(
                    self.client.clone(),
                    "oradb-database-controller",
                ))
            }),
            config: self.config,
        }
    }
}

/// Reconcile a SingleInstanceDatabase
///
/// The status computed by the phase handlers is written back once at the
/// end of the pass, also when a handler failed, and only if it changed.
#[instrument(skip(db, ctx), fields(database = %db.name_any(), namespace = ?db.namespace()))]
pub async fn reconcile(
    db: Arc<SingleInstanceDatabase>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = db.name_any();
    let ns = db.namespace().unwrap_or_default();
    debug!("reconciling database");

    if db.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&db, &ctx).await;
    }
    if !has_finalizer(db.as_ref(), DATABASE_FINALIZER) {
        // The finalizer write bumps the resourceVersion; its watch event
        // starts the next pass.
        ctx.kube.add_finalizer(&ns, &name).await?;
        return Ok(Action::await_change());
    }

    let mut status = db.status.clone().unwrap_or_default();
    let result = drive(&db, &ctx, &mut status).await;
    let action = report(&db, &ctx, &mut status, result).await;

    if db.status.as_ref() != Some(&status) {
        ctx.kube.patch_status(&db, &status).await?;
    }
    Ok(action)
}

/// Fold the pass result into the status and pick the requeue
async fn report(
    db: &SingleInstanceDatabase,
    ctx: &Context,
    status: &mut SingleInstanceDatabaseStatus,
    result: Result<Outcome, Error>,
) -> Action {
    let generation = db.metadata.generation;
    let policy = &ctx.config.requeue;
    status.observed_generation = generation;

    match result {
        Ok(Outcome::Converged) => {
            let message = "Database is ready".to_string();
            status.message = Some(message.clone());
            set_reconcile_condition(
                &mut status.conditions,
                ReconcileOutcome::Complete,
                message,
                generation,
            );
            policy.ready()
        }
        Ok(Outcome::Waiting(message)) => {
            status.message = Some(message.clone());
            set_reconcile_condition(
                &mut status.conditions,
                ReconcileOutcome::Queued,
                message,
                generation,
            );
            policy.waiting()
        }
        Err(e) => {
            let disposition = policy.disposition(&e);
            let message = e.to_string();

            if disposition.is_failure() {
                let already_reported = db
                    .status
                    .as_ref()
                    .is_some_and(|s| s.phase == DatabasePhase::Failed && s.message.as_ref() == Some(&message));
                if !already_reported {
                    warn!(error = %e, "database failed");
                    ctx.events
                        .publish(
                            &db.object_ref(&()),
                            EventType::Warning,
                            if e.class() == ErrorClass::Spec {
                                reasons::VALIDATION_FAILED
                            } else {
                                reasons::RECONCILE_FAILED
                            },
                            actions::RECONCILE,
                            Some(message.clone()),
                        )
                        .await;
                }
                status.phase = DatabasePhase::Failed;
                status.status = HealthStatus::Error;
            } else {
                info!(error = %e, phase = %status.phase, "waiting on dependency");
            }

            status.message = Some(message.clone());
            set_reconcile_condition(
                &mut status.conditions,
                disposition.outcome(),
                message,
                generation,
            );
            disposition.action()
        }
    }
}

/// Cleanup before the finalizer is released.
///
/// Refused while a DataguardBroker still lists this database. Pods are
/// force-deleted and the admin secret is removed unless `keepSecret` is set.
async fn handle_deletion(db: &SingleInstanceDatabase, ctx: &Context) -> Result<Action, Error> {
    let name = db.name_any();
    let ns = db.namespace().unwrap_or_default();

    if !has_finalizer(db, DATABASE_FINALIZER) {
        return Ok(Action::await_change());
    }

    let mut status = db.status.clone().unwrap_or_default();
    status.phase = DatabasePhase::Deleting;

    if let Some(broker) = status.dg_broker.clone() {
        let message = format!("still a member of DataguardBroker {broker}");
        info!(broker = %broker, "deletion blocked");
        if db.status.as_ref().and_then(|s| s.message.as_ref()) != Some(&message) {
            ctx.events
                .publish(
                    &db.object_ref(&()),
                    EventType::Warning,
                    reasons::DELETION_BLOCKED,
                    actions::DELETE,
                    Some(message.clone()),
                )
                .await;
        }
        status.message = Some(message.clone());
        set_reconcile_condition(
            &mut status.conditions,
            ReconcileOutcome::Blocked,
            message,
            db.metadata.generation,
        );
        if db.status.as_ref() != Some(&status) {
            ctx.kube.patch_status(db, &status).await?;
        }
        return Ok(ctx.config.requeue.waiting());
    }

    for pod in ctx.kube.list_pods(&ns, &name).await? {
        ctx.kube.delete_pod(&ns, &pod.name_any(), true).await?;
    }
    let secret = &db.spec.admin_password;
    if !secret.keep_secret {
        ctx.kube.delete_secret(&ns, &secret.secret_name).await?;
    }
    ctx.kube.remove_finalizer(&ns, &name).await?;
    info!("database cleanup complete");
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Only errors that escape the deferred status write land here, which
/// means the cluster API itself failed. Those are always retried.
pub fn error_policy(db: Arc<SingleInstanceDatabase>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(database = %db.name_any(), "object changed during the pass, recomputing");
        return ctx.config.requeue.waiting();
    }
    error!(
        ?error,
        database = %db.name_any(),
        "reconciliation failed"
    );
    ctx.config.requeue.waiting()
}
