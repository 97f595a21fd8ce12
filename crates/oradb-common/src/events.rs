//! Kubernetes Event recording for oradb controllers.
//!
//! Events are fire-and-forget: failures are logged and never propagate.
//! Permanent failures (spec, external service, non-retryable domain errors)
//! surface as Warning events alongside the Failed status.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (see [`reasons`])
    /// * `action` - What action was taken (see [`actions`])
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
    /// (e.g. "oradb-database-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event. Used by tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    // Database lifecycle
    /// Instance pods are being created
    pub const PROVISIONING_STARTED: &str = "ProvisioningStarted";
    /// Rolling image replacement started
    pub const IMAGE_UPDATE_STARTED: &str = "ImageUpdateStarted";
    /// Old-version pods removed after a rolling replacement
    pub const IMAGE_UPDATE_COMPLETE: &str = "ImageUpdateComplete";
    /// Replica count changed
    pub const SCALING: &str = "Scaling";
    /// Database is open and healthy
    pub const DATABASE_READY: &str = "DatabaseReady";
    /// Spec validation failed
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Reconciliation failed permanently
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// Deletion is waiting on a dependent resource
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";

    // Broker lifecycle
    /// Broker configuration created on the primary
    pub const BROKER_CONFIGURED: &str = "BrokerConfigured";
    /// Standby added to the broker configuration
    pub const MEMBER_ADDED: &str = "MemberAdded";
    /// Standby no longer referenced removed from the broker configuration
    pub const MEMBER_REMOVED: &str = "MemberRemoved";
    /// Fast-start failover observer pod created
    pub const OBSERVER_STARTED: &str = "ObserverStarted";
    /// Fast-start failover observer pod deleted
    pub const OBSERVER_STOPPED: &str = "ObserverStopped";
    /// Fast-start failover targets rewritten
    pub const FAILOVER_TARGETS_SET: &str = "FailoverTargetsSet";
    /// Role change initiated
    pub const SWITCHOVER_STARTED: &str = "SwitchoverStarted";
    /// Role change completed
    pub const SWITCHOVER_COMPLETE: &str = "SwitchoverComplete";
    /// Broker configuration removed on delete
    pub const BROKER_REMOVED: &str = "BrokerRemoved";

    // Pluggable databases
    /// Gateway accepted a lifecycle request
    pub const PDB_REQUEST_ACCEPTED: &str = "PdbRequestAccepted";
    /// Open mode changed
    pub const PDB_MODIFIED: &str = "PdbModified";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Creating instance pods
    pub const PROVISION: &str = "Provision";
    /// Replacing pods with a new image
    pub const UPDATE: &str = "Update";
    /// Changing replica count
    pub const SCALE: &str = "Scale";
    /// Running broker commands
    pub const CONFIGURE: &str = "Configure";
    /// Changing database roles
    pub const SWITCHOVER: &str = "Switchover";
    /// Finalizer cleanup
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reason_constants_are_pascal_case() {
        assert_eq!(reasons::DATABASE_READY, "DatabaseReady");
        assert_eq!(reasons::SWITCHOVER_STARTED, "SwitchoverStarted");
        assert_eq!(reasons::BROKER_CONFIGURED, "BrokerConfigured");
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        let publisher = NoopEventPublisher;
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::RECONCILE_FAILED,
                actions::RECONCILE,
                Some("test".to_string()),
            )
            .await;
    }
}
