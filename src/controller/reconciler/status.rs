//! # Status Projection
//!
//! Derives `ArgoCDStatus` from the workloads found in the cluster and the
//! outcome of the provider and tenancy steps. The status subresource is only
//! patched when the projection differs from what is already recorded.

use crate::cluster::{ClusterApi, ClusterError, Kind, ObjectKey};
use crate::controller::labels::InstanceRef;
use crate::controller::resources::component_name;
use crate::controller::resources::config::server_host;
use crate::controller::sso::{ProviderError, SsoValidationError};
use crate::controller::tenancy::NamespaceSets;
use crate::crd::{ArgoCD, ArgoCDStatus, ComponentPhase, Condition, ConditionStatus, SsoProviderType};
use chrono::{SecondsFormat, Utc};
use kube::api::DynamicObject;
use serde_json::json;
use tracing::debug;

pub const PHASE_AVAILABLE: &str = "Available";
pub const PHASE_PENDING: &str = "Pending";

pub const CONDITION_RECONCILED: &str = "Reconciled";
pub const CONDITION_SOURCE_NAMESPACES_CLAIMED: &str = "SourceNamespacesClaimed";

/// Outcome of the provider stage as seen by the status projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Active(Option<SsoProviderType>),
    Invalid(SsoValidationError),
    Failed(String),
}

impl From<&Result<Option<SsoProviderType>, ProviderError>> for ProviderOutcome {
    fn from(result: &Result<Option<SsoProviderType>, ProviderError>) -> Self {
        match result {
            Ok(provider) => Self::Active(*provider),
            Err(ProviderError::Validation(e)) => Self::Invalid(e.clone()),
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

/// Phase of a Deployment or StatefulSet from its replica counts
#[must_use]
pub fn workload_phase(obj: Option<&DynamicObject>) -> ComponentPhase {
    let Some(obj) = obj else {
        return ComponentPhase::Unknown;
    };
    let desired = obj
        .data
        .pointer("/spec/replicas")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(1);
    let ready = obj
        .data
        .pointer("/status/readyReplicas")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    if ready >= desired.max(1) {
        ComponentPhase::Running
    } else {
        ComponentPhase::Pending
    }
}

async fn phase_of(
    cluster: &dyn ClusterApi,
    kind: Kind,
    namespace: &str,
    name: String,
) -> Result<ComponentPhase, ClusterError> {
    let obj = cluster
        .get(&ObjectKey::namespaced(kind, namespace, name))
        .await?;
    Ok(workload_phase(obj.as_ref()))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Build a condition, keeping the previous transition time while the status holds
fn condition(
    previous: Option<&ArgoCDStatus>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: Option<String>,
) -> Condition {
    let last_transition_time = previous
        .and_then(|s| s.condition(type_))
        .filter(|c| c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(now()));
    Condition {
        r#type: type_.to_string(),
        status,
        last_transition_time,
        reason: Some(reason.to_string()),
        message,
    }
}

fn reconciled_condition(previous: Option<&ArgoCDStatus>, provider: &ProviderOutcome) -> Condition {
    match provider {
        ProviderOutcome::Active(_) => condition(
            previous,
            CONDITION_RECONCILED,
            ConditionStatus::True,
            "Success",
            None,
        ),
        ProviderOutcome::Invalid(e) => condition(
            previous,
            CONDITION_RECONCILED,
            ConditionStatus::False,
            "InvalidSSOConfiguration",
            Some(e.to_string()),
        ),
        ProviderOutcome::Failed(e) => condition(
            previous,
            CONDITION_RECONCILED,
            ConditionStatus::False,
            "SSOProviderFailed",
            Some(e.clone()),
        ),
    }
}

/// Message naming the contested source namespaces
#[must_use]
pub fn lost_claims_message(namespaces: &NamespaceSets) -> String {
    format!(
        "source namespaces already claimed by another Argo CD instance: {}",
        namespaces.lost_names()
    )
}

fn claims_condition(previous: Option<&ArgoCDStatus>, namespaces: &NamespaceSets) -> Condition {
    if namespaces.lost.is_empty() {
        condition(
            previous,
            CONDITION_SOURCE_NAMESPACES_CLAIMED,
            ConditionStatus::True,
            "Claimed",
            None,
        )
    } else {
        condition(
            previous,
            CONDITION_SOURCE_NAMESPACES_CLAIMED,
            ConditionStatus::False,
            "ClaimedByAnotherInstance",
            Some(lost_claims_message(namespaces)),
        )
    }
}

/// Read workload state and compute the status for this cycle
pub async fn project(
    cluster: &dyn ClusterApi,
    cr: &ArgoCD,
    provider: &ProviderOutcome,
    namespaces: &NamespaceSets,
) -> Result<ArgoCDStatus, ClusterError> {
    let ns = InstanceRef::of(cr).namespace;
    let previous = cr.status.as_ref();
    let deployment =
        |suffix: &str| phase_of(cluster, Kind::Deployment, &ns, component_name(cr, suffix));

    let application_controller = phase_of(
        cluster,
        Kind::StatefulSet,
        &ns,
        component_name(cr, "application-controller"),
    )
    .await?;
    let server = deployment("server").await?;
    let repo = deployment("repo-server").await?;
    let redis = deployment("redis").await?;

    let application_set_controller = match cr.spec.application_set {
        Some(_) => Some(deployment("applicationset-controller").await?),
        None => None,
    };
    let notifications_controller = if cr.spec.notifications.enabled {
        Some(deployment("notifications-controller").await?)
    } else {
        None
    };
    let sso = match provider {
        ProviderOutcome::Active(Some(SsoProviderType::Dex)) => {
            Some(deployment("dex-server").await?)
        }
        ProviderOutcome::Active(Some(SsoProviderType::Keycloak)) => {
            Some(deployment("keycloak").await?)
        }
        ProviderOutcome::Active(None) => None,
        ProviderOutcome::Invalid(_) | ProviderOutcome::Failed(_) => Some(ComponentPhase::Failed),
    };

    let core = [application_controller, server, repo, redis];
    let phase = if core.iter().all(|p| *p == ComponentPhase::Running) {
        PHASE_AVAILABLE
    } else {
        PHASE_PENDING
    };

    let exposed = cr.spec.server.ingress.enabled || cr.spec.server.route.enabled;

    Ok(ArgoCDStatus {
        phase: Some(phase.to_string()),
        application_controller: Some(application_controller),
        server: Some(server),
        repo: Some(repo),
        redis: Some(redis),
        application_set_controller,
        notifications_controller,
        sso,
        host: exposed.then(|| server_host(cr)),
        observed_generation: cr.metadata.generation,
        conditions: vec![
            reconciled_condition(previous, provider),
            claims_condition(previous, namespaces),
        ],
    })
}

/// Patch the status subresource when it changed; returns whether a write happened
pub async fn write(
    cluster: &dyn ClusterApi,
    cr: &ArgoCD,
    status: &ArgoCDStatus,
) -> Result<bool, ClusterError> {
    if cr.status.as_ref() == Some(status) {
        debug!("Status of {} unchanged", InstanceRef::of(cr));
        return Ok(false);
    }
    let instance = InstanceRef::of(cr);
    let key = ObjectKey::namespaced(Kind::ArgoCD, &instance.namespace, &instance.name);
    let patch = json!({ "status": status });
    cluster.patch_status(&key, &patch).await?;
    Ok(true)
}

/// Record a failed cycle in the `Reconciled` condition
///
/// `current` is the status written earlier in the same cycle, if any; the
/// rest of it is kept as is.
pub async fn mark_failed(
    cluster: &dyn ClusterApi,
    cr: &ArgoCD,
    current: Option<&ArgoCDStatus>,
    stage: &str,
    error: &anyhow::Error,
) -> Result<bool, ClusterError> {
    let previous = current
        .or(cr.status.as_ref())
        .cloned()
        .unwrap_or_default();
    let failed = condition(
        Some(&previous),
        CONDITION_RECONCILED,
        ConditionStatus::False,
        "StageFailed",
        Some(format!("{stage}: {error:#}")),
    );
    let mut status = previous;
    status.conditions.retain(|c| c.r#type != CONDITION_RECONCILED);
    status.conditions.insert(0, failed);
    write(cluster, cr, &status).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::controller::resources::testing::instance;
    use crate::controller::tenancy::LostClaim;
    use crate::crd::{ArgoCDSpec, ServerIngressSpec, ServerSpec};

    fn workload(kind: Kind, name: &str, replicas: i64, ready: Option<i64>) -> serde_json::Value {
        let (api_version, kind) = match kind {
            Kind::StatefulSet => ("apps/v1", "StatefulSet"),
            _ => ("apps/v1", "Deployment"),
        };
        let mut obj = json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": { "name": name, "namespace": "argocd" },
            "spec": { "replicas": replicas },
        });
        if let Some(ready) = ready {
            obj["status"] = json!({ "readyReplicas": ready });
        }
        obj
    }

    fn running_core(cluster: &FakeCluster) {
        cluster.insert_json(
            Kind::StatefulSet,
            workload(Kind::StatefulSet, "example-application-controller", 1, Some(1)),
        );
        for name in ["example-server", "example-repo-server", "example-redis"] {
            cluster.insert_json(Kind::Deployment, workload(Kind::Deployment, name, 1, Some(1)));
        }
    }

    #[test]
    fn test_workload_phase() {
        let obj = |replicas, ready| -> DynamicObject {
            serde_json::from_value(workload(Kind::Deployment, "x", replicas, ready)).unwrap()
        };
        assert_eq!(workload_phase(None), ComponentPhase::Unknown);
        assert_eq!(workload_phase(Some(&obj(2, Some(2)))), ComponentPhase::Running);
        assert_eq!(workload_phase(Some(&obj(2, Some(1)))), ComponentPhase::Pending);
        assert_eq!(workload_phase(Some(&obj(1, None))), ComponentPhase::Pending);
    }

    #[tokio::test]
    async fn test_available_when_core_runs() {
        let cluster = FakeCluster::new();
        let cr = instance(ArgoCDSpec::default());
        let sets = NamespaceSets::default();
        let provider = ProviderOutcome::Active(None);

        let pending = project(&cluster, &cr, &provider, &sets).await.unwrap();
        assert_eq!(pending.phase.as_deref(), Some(PHASE_PENDING));
        assert_eq!(pending.server, Some(ComponentPhase::Unknown));
        assert_eq!(pending.sso, None);

        running_core(&cluster);
        let available = project(&cluster, &cr, &provider, &sets).await.unwrap();
        assert_eq!(available.phase.as_deref(), Some(PHASE_AVAILABLE));
        assert_eq!(available.observed_generation, Some(1));
        assert_eq!(available.application_set_controller, None);
    }

    #[tokio::test]
    async fn test_invalid_provider_marks_sso_failed() {
        let cluster = FakeCluster::new();
        let cr = instance(ArgoCDSpec::default());
        let provider = ProviderOutcome::Invalid(SsoValidationError::KeycloakWithDexConfig);
        let status = project(&cluster, &cr, &provider, &NamespaceSets::default())
            .await
            .unwrap();
        assert_eq!(status.sso, Some(ComponentPhase::Failed));
        let reconciled = status.condition(CONDITION_RECONCILED).unwrap();
        assert_eq!(reconciled.status, ConditionStatus::False);
        assert!(reconciled
            .message
            .as_deref()
            .unwrap()
            .contains("multiple SSO providers"));
    }

    #[tokio::test]
    async fn test_lost_claims_condition_and_host() {
        let cluster = FakeCluster::new();
        let cr = instance(ArgoCDSpec {
            server: ServerSpec {
                host: Some("argocd.example.com".into()),
                ingress: ServerIngressSpec {
                    enabled: true,
                    ..ServerIngressSpec::default()
                },
                ..ServerSpec::default()
            },
            ..ArgoCDSpec::default()
        });
        let sets = NamespaceSets {
            lost: vec![LostClaim {
                namespace: "shared".into(),
                claimed_by: "other".into(),
            }],
            ..NamespaceSets::default()
        };
        let status = project(&cluster, &cr, &ProviderOutcome::Active(None), &sets)
            .await
            .unwrap();
        assert_eq!(status.host.as_deref(), Some("argocd.example.com"));
        let claimed = status.condition(CONDITION_SOURCE_NAMESPACES_CLAIMED).unwrap();
        assert_eq!(claimed.status, ConditionStatus::False);
        assert!(claimed.message.as_deref().unwrap().ends_with("shared"));
    }

    #[tokio::test]
    async fn test_transition_time_kept_while_status_holds() {
        let cluster = FakeCluster::new();
        let mut cr = instance(ArgoCDSpec::default());
        let none = ProviderOutcome::Active(None);
        let mut previous = project(&cluster, &cr, &none, &NamespaceSets::default())
            .await
            .unwrap();
        for c in &mut previous.conditions {
            c.last_transition_time = Some("2024-01-01T00:00:00Z".into());
        }
        cr.status = Some(previous.clone());

        let same = project(&cluster, &cr, &ProviderOutcome::Active(None), &NamespaceSets::default())
            .await
            .unwrap();
        assert_eq!(same, previous);

        let flipped = project(
            &cluster,
            &cr,
            &ProviderOutcome::Invalid(SsoValidationError::MissingProvider),
            &NamespaceSets::default(),
        )
        .await
        .unwrap();
        assert_ne!(
            flipped.condition(CONDITION_RECONCILED).unwrap().last_transition_time,
            Some("2024-01-01T00:00:00Z".into())
        );
    }

    #[tokio::test]
    async fn test_write_skips_unchanged_status() {
        let cluster = FakeCluster::new();
        let mut cr = instance(ArgoCDSpec::default());
        cluster.insert_typed(Kind::ArgoCD, &cr);
        let none = ProviderOutcome::Active(None);
        let status = project(&cluster, &cr, &none, &NamespaceSets::default())
            .await
            .unwrap();

        assert!(write(&cluster, &cr, &status).await.unwrap());
        cr.status = Some(status.clone());
        cluster.clear_writes();
        assert!(!write(&cluster, &cr, &status).await.unwrap());
        assert_eq!(cluster.write_count(), 0);
    }
}
