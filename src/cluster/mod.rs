//! # Cluster Access
//!
//! A narrow, kind-erased view of the Kubernetes API used by the reconciler.
//!
//! Every managed object is handled as a [`DynamicObject`] addressed by an
//! [`ObjectKey`]. The [`ClusterApi`] trait is the seam between reconciliation
//! logic and the API server; `KubeCluster` talks to a real cluster, and the
//! in-memory fake backs the unit tests.

mod client;
mod features;

#[cfg(test)]
pub(crate) mod fake;

pub use client::KubeCluster;
pub use features::{ClusterFeatures, FeatureSnapshot};

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    autoscaling::v2::HorizontalPodAutoscaler,
    core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount},
    networking::v1::Ingress,
    rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Every kind the operator reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    ArgoCD,
    Namespace,
    ServiceAccount,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    Secret,
    ConfigMap,
    Service,
    Ingress,
    Route,
    Deployment,
    StatefulSet,
    HorizontalPodAutoscaler,
    Prometheus,
    ServiceMonitor,
    PrometheusRule,
}

impl Kind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::ArgoCD => "ArgoCD",
            Kind::Namespace => "Namespace",
            Kind::ServiceAccount => "ServiceAccount",
            Kind::Role => "Role",
            Kind::RoleBinding => "RoleBinding",
            Kind::ClusterRole => "ClusterRole",
            Kind::ClusterRoleBinding => "ClusterRoleBinding",
            Kind::Secret => "Secret",
            Kind::ConfigMap => "ConfigMap",
            Kind::Service => "Service",
            Kind::Ingress => "Ingress",
            Kind::Route => "Route",
            Kind::Deployment => "Deployment",
            Kind::StatefulSet => "StatefulSet",
            Kind::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Kind::Prometheus => "Prometheus",
            Kind::ServiceMonitor => "ServiceMonitor",
            Kind::PrometheusRule => "PrometheusRule",
        }
    }

    #[must_use]
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            Kind::Namespace | Kind::ClusterRole | Kind::ClusterRoleBinding
        )
    }

    /// API coordinates used to build a dynamic `Api`
    #[must_use]
    pub fn api_resource(self) -> ApiResource {
        match self {
            Kind::ArgoCD => ApiResource::erase::<crate::crd::ArgoCD>(&()),
            Kind::Namespace => ApiResource::erase::<Namespace>(&()),
            Kind::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            Kind::Role => ApiResource::erase::<Role>(&()),
            Kind::RoleBinding => ApiResource::erase::<RoleBinding>(&()),
            Kind::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            Kind::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            Kind::Secret => ApiResource::erase::<Secret>(&()),
            Kind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            Kind::Service => ApiResource::erase::<Service>(&()),
            Kind::Ingress => ApiResource::erase::<Ingress>(&()),
            Kind::Deployment => ApiResource::erase::<Deployment>(&()),
            Kind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
            Kind::HorizontalPodAutoscaler => ApiResource::erase::<HorizontalPodAutoscaler>(&()),
            Kind::Route => custom("route.openshift.io", "v1", "Route", "routes"),
            Kind::Prometheus => custom("monitoring.coreos.com", "v1", "Prometheus", "prometheuses"),
            Kind::ServiceMonitor => {
                custom("monitoring.coreos.com", "v1", "ServiceMonitor", "servicemonitors")
            }
            Kind::PrometheusRule => {
                custom("monitoring.coreos.com", "v1", "PrometheusRule", "prometheusrules")
            }
        }
    }
}

fn custom(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: Kind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an object returned by the API
    #[must_use]
    pub fn of(kind: Kind, obj: &DynamicObject) -> Self {
        Self {
            kind,
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{verb} {key} failed: {source}")]
    Api {
        verb: &'static str,
        key: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to convert {what}: {source}")]
    Conversion {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Rejected(String),
}

/// Kind-erased access to the cluster
///
/// Not-found is never an error: `get` yields `None` and `delete` yields `false`.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError>;

    /// List objects of a kind, optionally within a namespace and filtered by a label selector
    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    async fn create(
        &self,
        key: &ObjectKey,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Full update; `obj` must carry the resourceVersion it was read at
    async fn replace(
        &self,
        key: &ObjectKey,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Returns whether the object existed
    async fn delete(&self, key: &ObjectKey) -> Result<bool, ClusterError>;

    /// JSON merge patch of the main resource
    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, ClusterError>;

    /// JSON merge patch of the status subresource
    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<(), ClusterError>;
}

/// Convert a typed object into its dynamic form
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, ClusterError> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|source| ClusterError::Conversion {
            what: std::any::type_name::<K>().to_string(),
            source,
        })
}

/// Convert a dynamic object back into a typed one
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, ClusterError> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|source| ClusterError::Conversion {
            what: std::any::type_name::<K>().to_string(),
            source,
        })
}

/// Labels of a dynamic object, empty when unset
#[must_use]
pub fn labels_of(obj: &DynamicObject) -> std::collections::BTreeMap<String, String> {
    obj.metadata.labels.clone().unwrap_or_default()
}
