//! DataguardBroker controller implementation
//!
//! One pass rebuilds the replication group from the broker, adds ready
//! standbys, removes dropped ones, keeps the failover targets a full mesh,
//! runs a requested switchover and points the broker service at the
//! primary. Status is written once at the end of the pass, guarded by the
//! resourceVersion the pass started from.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
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
    BrokerPhase, DatabaseRole, DataguardBroker, DataguardBrokerStatus, HealthStatus,
    SingleInstanceDatabase,
};
use oradb_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use oradb_common::kube_utils::{self, has_finalizer};
use oradb_common::{ControllerConfig, Error, ErrorClass, FIELD_MANAGER};
use oradb_exec::{KubePodExecutor, MarkerLock, PodExecutor};

use oradb_database::templates::observer_pod_name;

use crate::broker::Broker;
use crate::converge::{converge, current_primary_ref, serving_pod, Outcome};

/// Finalizer guarding removal of the broker configuration
pub const BROKER_FINALIZER: &str = "dataguardbroker.oradb.io/cleanup";

/// Trait abstracting Kubernetes client operations for DataguardBroker
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Write the broker status sub-resource, guarded by the resourceVersion
    /// of `broker`. A conflict means the broker changed during the pass.
    async fn patch_status(
        &self,
        broker: &DataguardBroker,
        status: &DataguardBrokerStatus,
    ) -> Result<(), Error>;

    /// Add the cleanup finalizer
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Remove the cleanup finalizer
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get a member database
    async fn get_database(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SingleInstanceDatabase>, Error>;

    /// All databases in a namespace
    async fn list_databases(&self, namespace: &str) -> Result<Vec<SingleInstanceDatabase>, Error>;

    /// Record (or clear) the broker a member database belongs to
    async fn set_member_broker(
        &self,
        namespace: &str,
        name: &str,
        broker: Option<String>,
    ) -> Result<(), Error>;

    /// Record the role a member database was observed in
    async fn set_member_role(
        &self,
        namespace: &str,
        name: &str,
        role: DatabaseRole,
    ) -> Result<(), Error>;

    /// Read one key of a Secret
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Zeroizing<String>>, Error>;

    /// Get a pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error>;

    /// Create a pod
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error>;

    /// Delete a pod; a missing pod is fine
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get a Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create or update a Service with server-side apply
    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<(), Error>;
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

    async fn merge_member_status(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<SingleInstanceDatabase> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        broker: &DataguardBroker,
        status: &DataguardBrokerStatus,
    ) -> Result<(), Error> {
        kube_utils::persist_status(&self.client, broker, status).await?;
        Ok(())
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        kube_utils::add_finalizer::<DataguardBroker>(
            &self.client,
            namespace,
            name,
            BROKER_FINALIZER,
        )
        .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        kube_utils::remove_finalizer::<DataguardBroker>(
            &self.client,
            namespace,
            name,
            BROKER_FINALIZER,
        )
        .await?;
        Ok(())
    }

    async fn get_database(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SingleInstanceDatabase>, Error> {
        let api: Api<SingleInstanceDatabase> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_databases(&self, namespace: &str) -> Result<Vec<SingleInstanceDatabase>, Error> {
        let api: Api<SingleInstanceDatabase> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn set_member_broker(
        &self,
        namespace: &str,
        name: &str,
        broker: Option<String>,
    ) -> Result<(), Error> {
        self.merge_member_status(namespace, name, serde_json::json!({ "dgBroker": broker }))
            .await
    }

    async fn set_member_role(
        &self,
        namespace: &str,
        name: &str,
        role: DatabaseRole,
    ) -> Result<(), Error> {
        self.merge_member_status(namespace, name, serde_json::json!({ "role": role }))
            .await
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Zeroizing<String>>, Error> {
        Ok(kube_utils::read_secret_key(&self.client, namespace, name, key).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), pod).await?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
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
}

/// Controller context shared by every reconcile of a DataguardBroker
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

    /// Marker lock owned by `broker`
    pub fn marker_lock(&self, broker: &DataguardBroker) -> MarkerLock {
        MarkerLock::new(
            format!(
                "{}/{}",
                broker.namespace().unwrap_or_default(),
                broker.name_any()
            ),
            self.config.marker_ttl,
        )
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
                    "oradb-dataguard-controller",
                ))
            }),
            config: self.config,
        }
    }
}

/// Reconcile a DataguardBroker
#[instrument(skip(broker, ctx), fields(broker = %broker.name_any(), namespace = ?broker.namespace()))]
pub async fn reconcile(broker: Arc<DataguardBroker>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = broker.name_any();
    let ns = broker.namespace().unwrap_or_default();
    debug!("reconciling broker");

    if broker.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&broker, &ctx).await;
    }
    if !has_finalizer(broker.as_ref(), BROKER_FINALIZER) {
        // The finalizer write bumps the resourceVersion; its watch event
        // starts the next pass.
        ctx.kube.add_finalizer(&ns, &name).await?;
        return Ok(Action::await_change());
    }

    let mut status = broker.status.clone().unwrap_or_default();
    let result = converge(&broker, &ctx, &mut status).await;
    let action = report(&broker, &ctx, &mut status, result).await;

    if broker.status.as_ref() != Some(&status) {
        ctx.kube.patch_status(&broker, &status).await?;
    }
    Ok(action)
}

async fn report(
    broker: &DataguardBroker,
    ctx: &Context,
    status: &mut DataguardBrokerStatus,
    result: Result<Outcome, Error>,
) -> Action {
    let generation = broker.metadata.generation;
    let policy = &ctx.config.requeue;
    status.observed_generation = generation;

    let (outcome, message, action) = match result {
        Ok(Outcome::Converged) => (
            ReconcileOutcome::Complete,
            "Broker configuration is up to date".to_string(),
            policy.ready(),
        ),
        Ok(Outcome::Waiting(message)) => (ReconcileOutcome::Queued, message, policy.waiting()),
        Err(e) => {
            let disposition = policy.disposition(&e);
            let message = e.to_string();
            if disposition.is_failure() {
                let already_reported = broker.status.as_ref().is_some_and(|s| {
                    s.phase == BrokerPhase::Failed && s.message.as_ref() == Some(&message)
                });
                if !already_reported {
                    warn!(error = %e, "broker failed");
                    ctx.events
                        .publish(
                            &broker.object_ref(&()),
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
                status.phase = BrokerPhase::Failed;
                status.status = HealthStatus::Error;
            } else {
                info!(error = %e, phase = %status.phase, "waiting on dependency");
                if e.class() == ErrorClass::NotFound {
                    status.status = HealthStatus::Pending;
                }
            }
            (disposition.outcome(), message, disposition.action())
        }
    };

    status.message = Some(message.clone());
    set_reconcile_condition(&mut status.conditions, outcome, message, generation);
    action
}

/// Remove the broker configuration and release the member databases.
///
/// The finalizer stays until the configuration is gone from the primary,
/// the observer is stopped and no database still points at this broker,
/// including databases dropped from the spec earlier.
async fn handle_deletion(broker: &DataguardBroker, ctx: &Context) -> Result<Action, Error> {
    let name = broker.name_any();
    let ns = broker.namespace().unwrap_or_default();

    if !has_finalizer(broker, BROKER_FINALIZER) {
        return Ok(Action::await_change());
    }

    let status = broker.status.clone().unwrap_or_default();
    let primary_ref = current_primary_ref(broker, &status);
    if let Some(primary) = ctx.kube.get_database(&ns, &primary_ref).await? {
        let pod = serving_pod(&primary).ok_or_else(|| {
            Error::not_ready(primary_ref.clone(), "primary not serving, cannot remove configuration")
        })?;
        let view = Broker::new(ctx.executor.as_ref(), pod);
        if status.fast_start_failover {
            view.set_fast_start_failover(false).await?;
        }
        view.remove_configuration().await?;
        info!(primary = %primary_ref, "broker configuration removed");
    }
    ctx.kube.delete_pod(&ns, &observer_pod_name(&name)).await?;

    for db in ctx.kube.list_databases(&ns).await? {
        if db.status.as_ref().and_then(|s| s.dg_broker.as_deref()) == Some(name.as_str()) {
            ctx.kube.set_member_broker(&ns, &db.name_any(), None).await?;
        }
    }

    ctx.events
        .publish(
            &broker.object_ref(&()),
            EventType::Normal,
            reasons::BROKER_REMOVED,
            actions::DELETE,
            None,
        )
        .await;
    ctx.kube.remove_finalizer(&ns, &name).await?;
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Only cluster API failures escape the deferred status write; they are
/// retried on the short interval.
pub fn error_policy(broker: Arc<DataguardBroker>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(broker = %broker.name_any(), "broker changed during the pass, recomputing");
        return ctx.config.requeue.waiting();
    }
    error!(
        ?error,
        broker = %broker.name_any(),
        "reconciliation failed"
    );
    ctx.config.requeue.waiting()
}
