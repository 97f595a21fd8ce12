//! PluggableDatabase controller implementation
//!
//! Each spec action is sent to the gateway once. The resource returns to
//! Ready when the gateway accepts it, and the action is not repeated until
//! the spec asks for a different one (or, for Modify, a different target
//! state).

use std::sync::Arc;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use oradb_common::conditions::{set_reconcile_condition, ReconcileOutcome};
use oradb_common::crd::{
    PdbAction, PdbPhase, PluggableDatabase, PluggableDatabaseSpec, PluggableDatabaseStatus,
    SecretKeyRef,
};
use oradb_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use oradb_common::fingerprint::spec_fingerprint;
use oradb_common::kube_utils::{self, has_finalizer};
use oradb_common::{ControllerConfig, Error, ErrorClass, LISTENER_PORT};

use crate::gateway::{ClientTls, GatewayClient, GatewayTarget, ReqwestGateway};
use crate::requests::{
    action_request, drop_request, modify_key, open_mode, status_request, AdminCredentials,
};

/// Finalizer guarding the drop of the PDB
pub const PDB_FINALIZER: &str = "pluggabledatabase.oradb.io/cleanup";

/// Trait abstracting Kubernetes client operations for PluggableDatabase
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Write the status sub-resource, guarded by the resourceVersion of
    /// `pdb`
    async fn patch_status(
        &self,
        pdb: &PluggableDatabase,
        status: &PluggableDatabaseStatus,
    ) -> Result<(), Error>;

    /// Add the cleanup finalizer
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Remove the cleanup finalizer
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Read one key of a Secret
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<Zeroizing<String>>, Error>;
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

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        pdb: &PluggableDatabase,
        status: &PluggableDatabaseStatus,
    ) -> Result<(), Error> {
        kube_utils::persist_status(&self.client, pdb, status).await?;
        Ok(())
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        kube_utils::add_finalizer::<PluggableDatabase>(&self.client, namespace, name, PDB_FINALIZER)
            .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        kube_utils::remove_finalizer::<PluggableDatabase>(
            &self.client,
            namespace,
            name,
            PDB_FINALIZER,
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
}

/// Controller context shared by every reconcile of a PluggableDatabase
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Data-access gateway client
    pub gateway: Arc<dyn GatewayClient>,
    /// Event publisher for Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Requeue intervals
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, gateway: Arc<dyn GatewayClient>) -> Self {
        Self {
            kube,
            gateway,
            events: Arc::new(oradb_common::events::NoopEventPublisher),
            config: ControllerConfig::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    gateway: Option<Arc<dyn GatewayClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            gateway: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the gateway client
    pub fn gateway(mut self, gateway: Arc<dyn GatewayClient>) -> Self {
        self.gateway = Some(gateway);
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
            gateway: self
                .gateway
                .unwrap_or_else(|| Arc::new(ReqwestGateway::default())),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(
                    self.client.clone(),
                    "oradb-pdb-controller",
                ))
            }),
            config: self.config,
        }
    }
}

/// Result of a pass that did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
enum Outcome {
    /// The last requested action is applied
    Converged,
}

/// Reconcile a PluggableDatabase
#[instrument(skip(pdb, ctx), fields(pdb = %pdb.name_any(), namespace = ?pdb.namespace(), action = %pdb.spec.action))]
pub async fn reconcile(pdb: Arc<PluggableDatabase>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = pdb.name_any();
    let ns = pdb.namespace().unwrap_or_default();
    debug!("reconciling pluggable database");

    if pdb.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&pdb, &ctx).await;
    }
    if !has_finalizer(pdb.as_ref(), PDB_FINALIZER) {
        // The finalizer write bumps the resourceVersion; its watch event
        // starts the next pass.
        ctx.kube.add_finalizer(&ns, &name).await?;
        return Ok(Action::await_change());
    }

    let mut status = pdb.status.clone().unwrap_or_default();
    let result = converge(&pdb, &ctx, &mut status).await;
    let action = report(&pdb, &ctx, &mut status, result).await;

    if pdb.status.as_ref() != Some(&status) {
        ctx.kube.patch_status(&pdb, &status).await?;
    }
    Ok(action)
}

/// True when the gateway has not yet applied what the spec asks for
fn needs_action(spec: &PluggableDatabaseSpec, status: &PluggableDatabaseStatus) -> bool {
    if status.phase != PdbPhase::Ready || status.action.as_deref() != Some(spec.action.method()) {
        return true;
    }
    spec.action == PdbAction::Modify && status.modify_option.as_deref() != Some(modify_key(spec).as_str())
}

async fn secret_value(
    ctx: &Context,
    namespace: &str,
    secret: &SecretKeyRef,
) -> Result<Zeroizing<String>, Error> {
    ctx.kube
        .get_secret_value(namespace, &secret.secret_name, &secret.secret_key)
        .await?
        .ok_or_else(|| Error::not_found("Secret", secret.secret_name.clone()))
}

/// Gateway address and credentials for `pdb`
async fn gateway_target(ctx: &Context, pdb: &PluggableDatabase) -> Result<GatewayTarget, Error> {
    let ns = pdb.namespace().unwrap_or_default();
    let spec = &pdb.spec;

    let tls = match &spec.tls_secret {
        Some(t) => {
            let key = |k: &str| SecretKeyRef {
                secret_name: t.secret_name.clone(),
                secret_key: k.to_string(),
            };
            Some(ClientTls {
                cert_pem: secret_value(ctx, &ns, &key(&t.cert_key)).await?,
                key_pem: secret_value(ctx, &ns, &key(&t.key_key)).await?,
                ca_pem: secret_value(ctx, &ns, &key(&t.ca_key)).await?,
            })
        }
        None => None,
    };

    Ok(GatewayTarget {
        pdb: spec.pdb_name.clone(),
        base_url: GatewayTarget::base_url(&spec.cdb_res_name, spec.gateway_port, tls.is_some()),
        user: secret_value(ctx, &ns, &spec.web_server_user).await?,
        password: secret_value(ctx, &ns, &spec.web_server_pwd).await?,
        tls,
    })
}

async fn converge(
    pdb: &PluggableDatabase,
    ctx: &Context,
    status: &mut PluggableDatabaseStatus,
) -> Result<Outcome, Error> {
    let spec = &pdb.spec;
    spec.validate()?;
    if !needs_action(spec, status) {
        return Ok(Outcome::Converged);
    }
    let fingerprint = spec_fingerprint(spec)?;
    let ns = pdb.namespace().unwrap_or_default();

    let target = gateway_target(ctx, pdb).await?;
    let admin = match (spec.action, &spec.admin_name, &spec.admin_pwd) {
        (PdbAction::Create, Some(user), Some(password)) => Some(AdminCredentials {
            user: secret_value(ctx, &ns, user).await?,
            password: secret_value(ctx, &ns, password).await?,
        }),
        _ => None,
    };

    status.phase = spec.action.in_flight_phase();
    info!(pdb_name = %spec.pdb_name, "sending {} to gateway", spec.action.method());
    ctx.gateway
        .send(&target, &action_request(spec, admin.as_ref()))
        .await?;

    status.action = Some(spec.action.method().to_string());
    status.phase = PdbPhase::Ready;
    status.applied_spec_hash = Some(fingerprint);

    let present = !matches!(spec.action, PdbAction::Unplug | PdbAction::Delete);
    if spec.action == PdbAction::Modify {
        status.modify_option = Some(modify_key(spec));
    }
    if matches!(spec.action, PdbAction::Create | PdbAction::Clone | PdbAction::Plug) {
        status.total_size = spec.total_size.clone();
    }
    if present {
        status.conn_string = Some(format!(
            "{}:{LISTENER_PORT}/{}",
            spec.cdb_res_name, spec.pdb_name
        ));
        status.open_mode = match ctx.gateway.send(&target, &status_request(spec)).await {
            Ok(response) => open_mode(&response),
            Err(e) => {
                warn!(error = %e, "could not read open mode");
                Some("UNKNOWN".to_string())
            }
        };
    } else {
        status.conn_string = None;
        status.open_mode = None;
    }

    let (reason, action) = match spec.action {
        PdbAction::Modify => (reasons::PDB_MODIFIED, actions::UPDATE),
        PdbAction::Delete => (reasons::PDB_REQUEST_ACCEPTED, actions::DELETE),
        PdbAction::Unplug => (reasons::PDB_REQUEST_ACCEPTED, actions::UPDATE),
        _ => (reasons::PDB_REQUEST_ACCEPTED, actions::PROVISION),
    };
    ctx.events
        .publish(
            &pdb.object_ref(&()),
            EventType::Normal,
            reason,
            action,
            Some(format!(
                "{} of {} accepted by the gateway",
                spec.action, spec.pdb_name
            )),
        )
        .await;
    Ok(Outcome::Converged)
}

async fn report(
    pdb: &PluggableDatabase,
    ctx: &Context,
    status: &mut PluggableDatabaseStatus,
    result: Result<Outcome, Error>,
) -> Action {
    let generation = pdb.metadata.generation;
    let policy = &ctx.config.requeue;
    status.observed_generation = generation;

    let (outcome, message, action) = match result {
        Ok(Outcome::Converged) => (
            ReconcileOutcome::Complete,
            format!(
                "{} completed",
                status.action.as_deref().unwrap_or(pdb.spec.action.method())
            ),
            policy.ready(),
        ),
        Err(e) => {
            let disposition = policy.disposition(&e);
            let message = e.to_string();
            if disposition.is_failure() {
                let already_reported = pdb.status.as_ref().is_some_and(|s| {
                    s.phase == PdbPhase::Failed && s.message.as_ref() == Some(&message)
                });
                if !already_reported {
                    warn!(error = %e, "pluggable database action failed");
                    ctx.events
                        .publish(
                            &pdb.object_ref(&()),
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
                status.phase = PdbPhase::Failed;
            } else {
                info!(error = %e, phase = %status.phase, "waiting on dependency");
            }
            (disposition.outcome(), message, disposition.action())
        }
    };

    status.message = Some(message.clone());
    set_reconcile_condition(&mut status.conditions, outcome, message, generation);
    action
}

/// Drop the PDB through the gateway before letting the resource go.
///
/// Nothing is dropped when no action was ever applied, or when the last
/// one already removed the PDB from the container database.
async fn handle_deletion(pdb: &PluggableDatabase, ctx: &Context) -> Result<Action, Error> {
    let name = pdb.name_any();
    let ns = pdb.namespace().unwrap_or_default();

    if !has_finalizer(pdb, PDB_FINALIZER) {
        return Ok(Action::await_change());
    }

    let current = pdb.status.clone().unwrap_or_default();
    let already_gone = matches!(
        current.action.as_deref(),
        None | Some("DELETE") | Some("UNPLUG")
    ) && current.phase != PdbPhase::Deleting;

    if !already_gone {
        let mut status = current.clone();
        status.phase = PdbPhase::Deleting;
        status.message = Some(format!("dropping {}", pdb.spec.pdb_name));
        if status != current {
            ctx.kube.patch_status(pdb, &status).await?;
        }

        let target = gateway_target(ctx, pdb).await?;
        match ctx.gateway.send(&target, &drop_request(&pdb.spec)).await {
            Ok(_) => info!(pdb_name = %pdb.spec.pdb_name, "pluggable database dropped"),
            Err(e) if e.status() == Some(404) => {
                info!(pdb_name = %pdb.spec.pdb_name, "pluggable database already gone")
            }
            Err(e) => return Err(e.into()),
        }
        ctx.events
            .publish(
                &pdb.object_ref(&()),
                EventType::Normal,
                reasons::PDB_REQUEST_ACCEPTED,
                actions::DELETE,
                Some(format!("dropped {}", pdb.spec.pdb_name)),
            )
            .await;
    }

    ctx.kube.remove_finalizer(&ns, &name).await?;
    Ok(Action::await_change())
}

/// Error policy for the controller
pub fn error_policy(pdb: Arc<PluggableDatabase>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(pdb = %pdb.name_any(), "object changed during the pass, recomputing");
        return ctx.config.requeue.waiting();
    }
    error!(
        ?error,
        pdb = %pdb.name_any(),
        "reconciliation failed"
    );
    ctx.config.requeue.waiting()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PdbError;
    use crate::gateway::{MockGatewayClient, Verb};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use oradb_common::conditions::{find_condition, RECONCILE_BLOCKED, RECONCILE_ERROR};
    use oradb_common::crd::PdbState;
    use std::sync::Mutex;
    use std::time::Duration;

    fn sample_pdb(action: PdbAction) -> PluggableDatabase {
        let spec: PluggableDatabaseSpec = serde_json::from_value(serde_json::json!({
            "cdbResName": "cdb-dev",
            "pdbName": "pdbdev",
            "action": action,
            "adminName": {"secretName": "pdb-admin", "secretKey": "user"},
            "adminPwd": {"secretName": "pdb-admin", "secretKey": "pwd"},
            "webServerUser": {"secretName": "ords", "secretKey": "user"},
            "webServerPwd": {"secretName": "ords", "secretKey": "pwd"},
            "totalSize": "2G"
        }))
        .unwrap();
        let mut pdb = PluggableDatabase::new("pdbdev", spec);
        pdb.metadata.namespace = Some("prod".to_string());
        pdb.metadata.uid = Some("uid-pdbdev".to_string());
        pdb.metadata.generation = Some(1);
        pdb.metadata.finalizers = Some(vec![PDB_FINALIZER.to_string()]);
        pdb
    }

    fn ready(mut pdb: PluggableDatabase, action: &str) -> PluggableDatabase {
        let mut status = PluggableDatabaseStatus {
            phase: PdbPhase::Ready,
            action: Some(action.to_string()),
            message: Some(format!("{action} completed")),
            observed_generation: Some(1),
            ..Default::default()
        };
        set_reconcile_condition(
            &mut status.conditions,
            ReconcileOutcome::Complete,
            format!("{action} completed"),
            Some(1),
        );
        pdb.status = Some(status);
        pdb
    }

    /// Secrets present, status writes captured
    fn kube_with_secrets() -> (MockKubeClient, Arc<Mutex<Vec<PluggableDatabaseStatus>>>) {
        let mut kube = MockKubeClient::new();
        kube.expect_get_secret_value()
            .returning(|_, name, key| Ok(Some(Zeroizing::new(format!("{name}/{key}")))));
        let writes = Arc::new(Mutex::new(Vec::new()));
        let w = writes.clone();
        kube.expect_patch_status().returning(move |_, s| {
            w.lock().unwrap().push(s.clone());
            Ok(())
        });
        (kube, writes)
    }

    fn ctx(kube: MockKubeClient, gateway: MockGatewayClient) -> Arc<Context> {
        Arc::new(Context::for_testing(Arc::new(kube), Arc::new(gateway)))
    }

    /// Story: a new PDB is created. The gateway accepts the request, the
    /// open mode is read back, and the resource is Ready.
    #[tokio::test]
    async fn story_create_reaches_ready() {
        let (kube, writes) = kube_with_secrets();
        let mut gateway = MockGatewayClient::new();
        gateway
            .expect_send()
            .withf(|target, r| {
                r.verb == Verb::Post
                    && r.body.as_ref().is_some_and(|b| {
                        b["method"] == "CREATE" && b["adminPwd"] == "pdb-admin/pwd"
                    })
                    && target.base_url == "http://cdb-dev-ords:8888"
                    && target.user.as_str() == "ords/user"
            })
            .times(1)
            .returning(|_, _| Ok(serde_json::json!({"items": []})));
        gateway
            .expect_send()
            .withf(|_, r| r.verb == Verb::Get)
            .times(1)
            .returning(|_, _| Ok(serde_json::json!({"open_mode": "READ WRITE"})));

        let action = reconcile(Arc::new(sample_pdb(PdbAction::Create)), ctx(kube, gateway))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));

        let status = writes.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status.phase, PdbPhase::Ready);
        assert_eq!(status.action.as_deref(), Some("CREATE"));
        assert_eq!(status.open_mode.as_deref(), Some("READ WRITE"));
        assert_eq!(status.total_size.as_deref(), Some("2G"));
        assert_eq!(status.conn_string.as_deref(), Some("cdb-dev:1521/pdbdev"));
        assert!(status.applied_spec_hash.is_some());
    }

    #[tokio::test]
    async fn applied_action_is_not_repeated() {
        let mut kube = MockKubeClient::new();
        kube.expect_patch_status().never();
        let mut gateway = MockGatewayClient::new();
        gateway.expect_send().never();

        let pdb = ready(sample_pdb(PdbAction::Create), "CREATE");
        let action = reconcile(Arc::new(pdb), ctx(kube, gateway)).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    }

    /// A new target state re-issues Modify; the same one does not.
    #[tokio::test]
    async fn modify_follows_target_state() {
        let mut pdb = sample_pdb(PdbAction::Modify);
        pdb.spec.pdb_state = Some(PdbState::Close);
        pdb.spec.modify_option = Some("IMMEDIATE".to_string());
        let mut pdb = ready(pdb, "MODIFY");
        if let Some(s) = pdb.status.as_mut() {
            s.modify_option = Some("OPEN-READ WRITE".to_string());
        }

        let (kube, writes) = kube_with_secrets();
        let mut gateway = MockGatewayClient::new();
        gateway
            .expect_send()
            .withf(|_, r| r.verb == Verb::Post && r.path.ends_with("/pdbdev/status"))
            .times(1)
            .returning(|_, _| Ok(serde_json::Value::Null));
        gateway
            .expect_send()
            .withf(|_, r| r.verb == Verb::Get)
            .returning(|_, _| Ok(serde_json::json!({"open_mode": "MOUNTED"})));

        reconcile(Arc::new(pdb), ctx(kube, gateway)).await.unwrap();
        let status = writes.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status.modify_option.as_deref(), Some("CLOSE-IMMEDIATE"));
        assert_eq!(status.open_mode.as_deref(), Some("MOUNTED"));
    }

    /// Story: the gateway answers 200 but reports ORA-65012 inside the body.
    /// The resource fails with the database message and is retried on the
    /// long interval.
    #[tokio::test]
    async fn story_error_details_fail_the_resource() {
        let (kube, writes) = kube_with_secrets();
        let mut gateway = MockGatewayClient::new();
        gateway.expect_send().times(1).returning(|_, _| {
            Err(PdbError::Database {
                pdb: "pdbdev".into(),
                code: Some(65012),
                details: "ORA-65012: Pluggable database PDBDEV already exists.".into(),
            })
        });

        let action = reconcile(Arc::new(sample_pdb(PdbAction::Create)), ctx(kube, gateway))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let status = writes.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status.phase, PdbPhase::Failed);
        assert!(status.message.unwrap().contains("ORA-65012"));
        assert!(find_condition(&status.conditions, RECONCILE_ERROR).is_some());
        assert_eq!(status.action, None);
    }

    #[tokio::test]
    async fn missing_gateway_secret_blocks() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_secret_value().returning(|_, _, _| Ok(None));
        let writes = Arc::new(Mutex::new(Vec::new()));
        let w = writes.clone();
        kube.expect_patch_status().returning(move |_, s| {
            w.lock().unwrap().push(s.clone());
            Ok(())
        });
        let mut gateway = MockGatewayClient::new();
        gateway.expect_send().never();

        let action = reconcile(Arc::new(sample_pdb(PdbAction::Create)), ctx(kube, gateway))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
        let status = writes.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status.phase, PdbPhase::Pending);
        assert!(find_condition(&status.conditions, RECONCILE_BLOCKED).is_some());
    }

    #[tokio::test]
    async fn unplug_clears_open_mode() {
        let mut pdb = sample_pdb(PdbAction::Unplug);
        pdb.spec.xml_file_name = Some("/tmp/pdbdev.xml".to_string());
        let mut pdb = ready(pdb, "CREATE");
        if let Some(s) = pdb.status.as_mut() {
            s.open_mode = Some("READ WRITE".to_string());
        }

        let (kube, writes) = kube_with_secrets();
        let mut gateway = MockGatewayClient::new();
        gateway
            .expect_send()
            .times(1)
            .returning(|_, _| Ok(serde_json::Value::Null));

        reconcile(Arc::new(pdb), ctx(kube, gateway)).await.unwrap();
        let status = writes.lock().unwrap().last().cloned().unwrap();
        assert_eq!(status.action.as_deref(), Some("UNPLUG"));
        assert_eq!(status.open_mode, None);
    }

    #[tokio::test]
    async fn missing_finalizer_is_added_first() {
        let mut kube = MockKubeClient::new();
        kube.expect_add_finalizer().times(1).returning(|_, _| Ok(()));
        kube.expect_patch_status().never();
        let mut gateway = MockGatewayClient::new();
        gateway.expect_send().never();
        let mut pdb = sample_pdb(PdbAction::Create);
        pdb.metadata.finalizers = None;

        let action = reconcile(Arc::new(pdb), ctx(kube, gateway)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// A status computed from an outdated read is rejected, not merged over
    /// the newer object.
    #[tokio::test]
    async fn stale_status_write_is_recomputed() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_secret_value().returning(|_, _, _| Ok(None));
        kube.expect_patch_status()
            .withf(|read, _| read.resource_version().as_deref() == Some("5"))
            .times(1)
            .returning(|_, _| {
                Err(Error::from(kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "the object has been modified".to_string(),
                    reason: "Conflict".to_string(),
                    code: 409,
                })))
            });
        let mut gateway = MockGatewayClient::new();
        gateway.expect_send().never();
        let mut pdb = sample_pdb(PdbAction::Create);
        pdb.metadata.resource_version = Some("5".to_string());
        let pdb = Arc::new(pdb);
        let ctx = ctx(kube, gateway);

        let err = reconcile(pdb.clone(), ctx.clone()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            error_policy(pdb, &err, ctx),
            Action::requeue(Duration::from_secs(15))
        );
    }

    mod deletion {
        use super::*;

        fn deleting(mut pdb: PluggableDatabase) -> PluggableDatabase {
            pdb.metadata.deletion_timestamp = Some(Time(k8s_openapi::chrono::Utc::now()));
            pdb
        }

        #[tokio::test]
        async fn drops_then_releases() {
            let (mut kube, _) = kube_with_secrets();
            kube.expect_remove_finalizer().times(1).returning(|_, _| Ok(()));
            let mut gateway = MockGatewayClient::new();
            gateway
                .expect_send()
                .withf(|_, r| r.verb == Verb::Delete)
                .times(1)
                .returning(|_, _| Ok(serde_json::Value::Null));

            let pdb = deleting(ready(sample_pdb(PdbAction::Create), "CREATE"));
            reconcile(Arc::new(pdb), ctx(kube, gateway)).await.unwrap();
        }

        #[tokio::test]
        async fn already_dropped_on_gateway_is_fine() {
            let (mut kube, _) = kube_with_secrets();
            kube.expect_remove_finalizer().times(1).returning(|_, _| Ok(()));
            let mut gateway = MockGatewayClient::new();
            gateway.expect_send().returning(|_, _| {
                Err(PdbError::Http {
                    pdb: "pdbdev".into(),
                    status: 404,
                    message: "not found".into(),
                })
            });

            let pdb = deleting(ready(sample_pdb(PdbAction::Create), "CREATE"));
            reconcile(Arc::new(pdb), ctx(kube, gateway)).await.unwrap();
        }

        /// The finalizer stays until the gateway confirms the drop.
        #[tokio::test]
        async fn gateway_failure_keeps_finalizer() {
            let (mut kube, _) = kube_with_secrets();
            kube.expect_remove_finalizer().never();
            let mut gateway = MockGatewayClient::new();
            gateway.expect_send().returning(|_, _| {
                Err(PdbError::Http {
                    pdb: "pdbdev".into(),
                    status: 500,
                    message: "internal".into(),
                })
            });

            let pdb = deleting(ready(sample_pdb(PdbAction::Create), "CREATE"));
            assert!(reconcile(Arc::new(pdb), ctx(kube, gateway)).await.is_err());
        }

        #[tokio::test]
        async fn unplugged_pdb_is_not_dropped() {
            let mut kube = MockKubeClient::new();
            kube.expect_remove_finalizer().times(1).returning(|_, _| Ok(()));
            let mut gateway = MockGatewayClient::new();
            gateway.expect_send().never();

            let pdb = deleting(ready(sample_pdb(PdbAction::Unplug), "UNPLUG"));
            reconcile(Arc::new(pdb), ctx(kube, gateway)).await.unwrap();
        }
    }
}
