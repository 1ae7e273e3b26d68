//! # Kubernetes Events
//!
//! Warning and normal events attached to an `ArgoCD` resource, visible with
//! `kubectl describe argocd`.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails a
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Event reasons, shown in the REASON column
pub mod reasons {
    /// A deprecated spec field is still in use
    pub const DEPRECATED_FIELD: &str = "DeprecatedField";
    /// A listed source namespace is claimed by another instance
    pub const NAMESPACE_CLAIM_LOST: &str = "NamespaceClaimLost";
    /// The SSO provider request was rejected
    pub const SSO_VALIDATION_FAILED: &str = "SSOValidationFailed";
}

/// Event actions, shown in the ACTION column
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publishes through the kube-runtime event recorder
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    #[must_use]
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
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Drops every event; used when no recorder is configured
#[derive(Debug, Default)]
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

/// Keeps published events in memory for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    events: std::sync::Mutex<Vec<(EventType, String, Option<String>)>>,
}

#[cfg(test)]
impl RecordingPublisher {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .expect("recorder lock")
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }

    pub fn notes(&self) -> Vec<Option<String>> {
        self.events
            .lock()
            .expect("recorder lock")
            .iter()
            .map(|(_, _, note)| note.clone())
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events
            .lock()
            .expect("recorder lock")
            .push((type_, reason.to_string(), note));
    }
}
