//! # ArgoCD Spec
//!
//! The `ArgoCD` custom resource and its per-component specification.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ArgoCD Custom Resource Definition
///
/// Declares a complete Argo CD installation in one namespace. Every object
/// the operator creates for it carries back-reference labels to this resource.
///
/// # Example
///
/// ```yaml
/// apiVersion: argoproj.io/v1beta1
/// kind: ArgoCD
/// metadata:
///   name: example
///   namespace: argocd
/// spec:
///   sso:
///     provider: dex
///     dex:
///       openShiftOAuth: true
///   server:
///     ingress:
///       enabled: true
///   sourceNamespaces:
///     - team-a
/// ```
#[derive(
    kube::CustomResource,
    Debug,
    Clone,
    Default,
    PartialEq,
    Deserialize,
    Serialize,
    schemars::JsonSchema,
)]
#[kube(
    kind = "ArgoCD",
    group = "argoproj.io",
    version = "v1beta1",
    namespaced,
    status = "crate::crd::ArgoCDStatus",
    shortname = "argocd",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"SSO", "type":"string", "jsonPath":".status.sso"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDSpec {
    /// Argo CD container image (without tag)
    #[serde(default)]
    pub image: Option<String>,
    /// Argo CD image tag or digest
    #[serde(default)]
    pub version: Option<String>,
    /// Single sign-on provider selection
    #[serde(default)]
    pub sso: Option<crate::crd::SsoSpec>,
    /// Deprecated: use `sso.provider: dex` with `sso.dex`
    #[serde(default)]
    pub dex: Option<crate::crd::DexSpec>,
    #[serde(default)]
    pub server: ServerSpec,
    #[serde(default)]
    pub repo: RepoSpec,
    #[serde(default)]
    pub redis: RedisSpec,
    #[serde(default)]
    pub controller: ApplicationControllerSpec,
    /// ApplicationSet controller; absent means disabled
    #[serde(default)]
    pub application_set: Option<ApplicationSetSpec>,
    #[serde(default)]
    pub notifications: NotificationsSpec,
    #[serde(default)]
    pub rollouts: RolloutsSpec,
    #[serde(default)]
    pub prometheus: PrometheusSpec,
    /// Node selector and tolerations applied to every workload
    #[serde(default)]
    pub node_placement: Option<NodePlacementSpec>,
    /// Namespaces whose Applications may reference this instance
    #[serde(default)]
    pub source_namespaces: Vec<String>,
    #[serde(default)]
    pub rbac: RbacSpec,
    /// Extra keys merged into `argocd-cm`
    #[serde(default)]
    pub extra_config: BTreeMap<String, String>,
}

/// Compute resource requests and limits as quantity strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TolerationSpec {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub effect: Option<String>,
    #[serde(default)]
    pub toleration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacementSpec {
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<TolerationSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
    /// Serve plain HTTP (TLS terminated upstream)
    #[serde(default)]
    pub insecure: bool,
    /// External host name used by the ingress and route
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ingress: ServerIngressSpec,
    #[serde(default)]
    pub route: RouteSpec,
    #[serde(default)]
    pub autoscale: AutoscaleSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerIngressSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ingress_class_name: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub tls: Vec<IngressTlsSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressTlsSpec {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscaleSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_replicas: Option<i32>,
    #[serde(default)]
    pub max_replicas: Option<i32>,
    #[serde(default)]
    pub target_cpu_utilization_percentage: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoSpec {
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationControllerSpec {
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
    /// Status and operation processor counts
    #[serde(default)]
    pub processors: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSetSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub extra_command_args: Vec<String>,
    /// ConfigMap in the instance namespace holding the SCM provider root CA
    /// under the `cert` key
    #[serde(default, rename = "scmRootCAConfigMap")]
    pub scm_root_ca_config_map: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloutsSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirementsSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub replicas: Option<i32>,
}

/// Contents of `argocd-rbac-cm`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RbacSpec {
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub default_policy: Option<String>,
    #[serde(default)]
    pub scopes: Option<String>,
}
