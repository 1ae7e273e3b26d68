//! # Managed Resources
//!
//! Desired-state builders for every object an instance owns, one
//! [`ManagedKind`] per resource group. Builders are pure: they read the
//! instance and a [`BuildContext`] prepared before the pipeline runs and
//! return [`Intent`]s for the apply engine. Nothing here talks to the cluster
//! except [`BuildContext::load`].
//!
//! - `rbac`: service accounts, roles and bindings (namespaced and cluster)
//! - `trust`: CA, server certificate and generated credentials
//! - `config`: `argocd-*-cm` config maps
//! - `network`: services, ingress and route
//! - `workloads`: core deployments, the controller stateful set, autoscaler
//! - `applicationset`, `notifications`, `rollouts`: optional components
//! - `monitoring`: Prometheus operator objects

pub mod applicationset;
pub mod config;
pub mod monitoring;
pub mod network;
pub mod notifications;
pub mod rbac;
pub mod rollouts;
pub mod trust;
pub mod workloads;

use crate::cluster::{ClusterApi, FeatureSnapshot, Kind};
use crate::config::OperatorSettings;
use crate::controller::apply::{Compare, Desired, Field, Intent};
use crate::controller::tenancy::NamespaceSets;
use crate::crd::{ArgoCD, NodePlacementSpec, ResourceRequirementsSpec};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{PodSpec, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use std::collections::BTreeMap;

pub use trust::{TlsHashes, TrustMaterial};

/// Builds the desired objects of one resource group
pub trait ManagedKind: Send + Sync {
    /// Hint passed to hooks and used in logs
    fn component(&self) -> &'static str;

    fn intents(&self, cr: &ArgoCD, ctx: &BuildContext) -> Result<Vec<Intent>>;
}

/// Everything a builder may depend on besides the instance itself
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub settings: OperatorSettings,
    pub features: FeatureSnapshot,
    pub namespaces: NamespaceSets,
    pub trust: TrustMaterial,
    pub tls: TlsHashes,
}

impl BuildContext {
    /// Read existing trust material and TLS secrets; generate what is missing
    pub async fn load(
        cluster: &dyn ClusterApi,
        cr: &ArgoCD,
        settings: OperatorSettings,
        features: FeatureSnapshot,
        namespaces: NamespaceSets,
    ) -> Result<Self> {
        let trust = TrustMaterial::load_or_generate(cluster, cr)
            .await
            .context("Failed to prepare trust material")?;
        let tls = TlsHashes::load(cluster, cr)
            .await
            .context("Failed to read TLS secrets")?;
        Ok(Self {
            settings,
            features,
            namespaces,
            trust,
            tls,
        })
    }
}

pub const LABELS: Compare = Compare::subset(Field::Labels);

pub const SERVICE_ACCOUNT: &[Compare] = &[LABELS];
pub const ROLE: &[Compare] = &[LABELS, Compare::exact(Field::Path("/rules"))];
pub const ROLE_BINDING: &[Compare] = &[
    LABELS,
    Compare::exact(Field::Path("/subjects")),
    Compare::exact(Field::Path("/roleRef")).immutable(),
];
pub const CONFIG_MAP: &[Compare] = &[LABELS, Compare::exact(Field::Path("/data"))];
pub const SERVICE: &[Compare] = &[LABELS, Compare::subset(Field::Path("/spec"))];
pub const INGRESS: &[Compare] = &[
    LABELS,
    Compare::exact(Field::Annotations),
    Compare::subset(Field::Path("/spec")),
];
pub const WORKLOAD: &[Compare] = &[
    LABELS,
    Compare::exact(Field::Path("/spec/selector")).immutable(),
    Compare::subset(Field::Path("/spec/replicas")),
    Compare::subset(Field::Path("/spec/template")),
    Compare::exact(Field::Path("/spec/template/spec/nodeSelector")),
    Compare::exact(Field::Path("/spec/template/spec/tolerations")),
];
pub const SPEC_SUBSET: &[Compare] = &[LABELS, Compare::subset(Field::Path("/spec"))];

/// `<instance>-<suffix>`
#[must_use]
pub fn component_name(cr: &ArgoCD, suffix: &str) -> String {
    format!("{}-{}", cr.name_any(), suffix)
}

/// Namespace of the instance
#[must_use]
pub fn instance_namespace(cr: &ArgoCD) -> String {
    cr.namespace().unwrap_or_default()
}

/// Resolve a container image: instance override, then environment, then default
///
/// A partial instance override fills the missing half from the default.
#[must_use]
pub fn image_ref(
    image: Option<&str>,
    version: Option<&str>,
    env: Option<&str>,
    default_image: &str,
    default_version: &str,
) -> String {
    let image = image.filter(|s| !s.is_empty());
    let version = version.filter(|s| !s.is_empty());
    if image.is_some() || version.is_some() {
        return join_image(
            image.unwrap_or(default_image),
            version.unwrap_or(default_version),
        );
    }
    match env.filter(|s| !s.is_empty()) {
        Some(env) => env.to_string(),
        None => join_image(default_image, default_version),
    }
}

fn join_image(image: &str, version: &str) -> String {
    if version.starts_with("sha256:") {
        format!("{image}@{version}")
    } else {
        format!("{image}:{version}")
    }
}

#[must_use]
pub fn resource_requirements(
    spec: Option<&ResourceRequirementsSpec>,
) -> Option<ResourceRequirements> {
    let spec = spec?;
    let quantities = |values: &BTreeMap<String, String>| {
        (!values.is_empty()).then(|| {
            values
                .iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect::<BTreeMap<_, _>>()
        })
    };
    Some(ResourceRequirements {
        limits: quantities(&spec.limits),
        requests: quantities(&spec.requests),
        ..ResourceRequirements::default()
    })
}

/// Apply the instance-wide node selector and tolerations to a pod
pub fn apply_node_placement(pod: &mut PodSpec, placement: Option<&NodePlacementSpec>) {
    let Some(placement) = placement else {
        return;
    };
    if !placement.node_selector.is_empty() {
        pod.node_selector = Some(placement.node_selector.clone());
    }
    if !placement.tolerations.is_empty() {
        pod.tolerations = Some(
            placement
                .tolerations
                .iter()
                .map(|t| Toleration {
                    key: t.key.clone(),
                    operator: t.operator.clone(),
                    value: t.value.clone(),
                    effect: t.effect.clone(),
                    toleration_seconds: t.toleration_seconds,
                })
                .collect(),
        );
    }
}

/// Wrap a typed object as a present intent
pub fn present<K: Resource + Serialize>(
    kind: Kind,
    obj: &K,
    compare: &'static [Compare],
) -> Result<Intent> {
    Ok(Intent::Present(
        Desired::new(kind, obj, compare).with_context(|| format!("Failed to encode {kind}"))?,
    ))
}

/// Wrap raw JSON (custom resources) as a present intent
pub fn present_json(
    kind: Kind,
    value: serde_json::Value,
    compare: &'static [Compare],
) -> Result<Intent> {
    Ok(Intent::Present(
        Desired::from_json(kind, value, compare)
            .with_context(|| format!("Failed to encode {kind}"))?,
    ))
}

/// Turn a set of intents into deletions of the same objects
#[must_use]
pub fn absent(intents: Vec<Intent>) -> Vec<Intent> {
    intents
        .into_iter()
        .map(|intent| match intent {
            Intent::Present(desired) => Intent::Absent(desired.key),
            absent @ Intent::Absent(_) => absent,
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_precedence() {
        // instance override wins, missing half falls back to default
        let argocd = "quay.io/argoproj/argocd";
        assert_eq!(
            image_ref(Some("my/argocd"), None, Some("env/argocd:v9"), argocd, "v2"),
            "my/argocd:v2"
        );
        assert_eq!(
            image_ref(None, Some("v3"), Some("env/argocd:v9"), argocd, "v2"),
            "quay.io/argoproj/argocd:v3"
        );
        assert_eq!(
            image_ref(None, None, Some("env/argocd:v9"), argocd, "v2"),
            "env/argocd:v9"
        );
        assert_eq!(
            image_ref(None, None, None, argocd, "v2"),
            "quay.io/argoproj/argocd:v2"
        );
        assert_eq!(
            image_ref(None, None, None, "quay.io/keycloak/keycloak", "sha256:abc"),
            "quay.io/keycloak/keycloak@sha256:abc"
        );
    }

    #[test]
    fn test_resource_requirements_conversion() {
        assert!(resource_requirements(None).is_none());
        let spec = ResourceRequirementsSpec {
            limits: BTreeMap::from([("cpu".to_string(), "500m".to_string())]),
            requests: BTreeMap::new(),
        };
        let converted = resource_requirements(Some(&spec)).unwrap();
        assert_eq!(converted.limits.unwrap()["cpu"], Quantity("500m".into()));
        assert!(converted.requests.is_none());
    }

    #[test]
    fn test_absent_keeps_keys() {
        let key = crate::cluster::ObjectKey::namespaced(Kind::Secret, "argocd", "x");
        let converted = absent(vec![Intent::Absent(key.clone())]);
        assert!(matches!(&converted[0], Intent::Absent(k) if *k == key));
    }
}
