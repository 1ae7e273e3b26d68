//! # Label Contract
//!
//! Every managed object points back at its owning instance through labels
//! (and, for cluster-scoped objects, annotations). Namespaces record which
//! instance manages them or may reference them. These keys are the only
//! ownership index; nothing is inferred from object names.

use crate::crd::ArgoCD;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

pub const PART_OF_ARGOCD: &str = "argocd";

/// Back-reference to the owning instance
pub const INSTANCE_NAME: &str = "argocds.argoproj.io/name";
pub const INSTANCE_NAMESPACE: &str = "argocds.argoproj.io/namespace";

/// Namespace label: resources of the instance in the named namespace may be placed here
pub const MANAGED_BY_NAMESPACE: &str = "argocd.argoproj.io/managed-by";
/// Namespace label: Applications here may reference the instance in the named namespace
pub const SOURCE_NAMESPACE_CLAIM: &str = "argocd.argoproj.io/managed-by-cluster-argocd";

pub const RBAC_TYPE: &str = "argocd.argoproj.io/rbac-type";
pub const RBAC_RESOURCE_MANAGEMENT: &str = "resource-management";
pub const RBAC_APP_MANAGEMENT: &str = "app-management";

pub const SECRET_TYPE: &str = "argocd.argoproj.io/secret-type";
pub const SECRET_TYPE_CLUSTER: &str = "cluster";

pub const REDIS_TLS_HASH: &str = "argocd.argoproj.io/redis-tls-hash";
pub const REPO_SERVER_TLS_HASH: &str = "argocd.argoproj.io/repo-server-tls-hash";
pub const SCM_ROOT_CA_HASH: &str = "argocd.argoproj.io/scm-root-ca-hash";

/// Identity of an ArgoCD instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub namespace: String,
    pub name: String,
}

impl InstanceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn of(cr: &ArgoCD) -> Self {
        Self {
            namespace: cr.namespace().unwrap_or_default(),
            name: cr.name_any(),
        }
    }

    /// Recover the instance from back-reference labels or annotations
    #[must_use]
    pub fn from_back_reference(values: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self::new(
            values.get(INSTANCE_NAMESPACE)?.clone(),
            values.get(INSTANCE_NAME)?.clone(),
        ))
    }

    /// Label selector matching every object owned by this instance
    #[must_use]
    pub fn selector(&self) -> String {
        format!(
            "{INSTANCE_NAME}={},{INSTANCE_NAMESPACE}={}",
            self.name, self.namespace
        )
    }

    /// `namespace/name`, used for per-instance process state
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    #[must_use]
    pub fn object_ref(&self) -> kube_runtime::reflector::ObjectRef<ArgoCD> {
        kube_runtime::reflector::ObjectRef::new(&self.name).within(&self.namespace)
    }
}

impl std::fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn back_reference(cr: &InstanceRef) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_NAME.to_string(), cr.name.clone()),
        (INSTANCE_NAMESPACE.to_string(), cr.namespace.clone()),
    ])
}

/// Labels carried by every managed object
#[must_use]
pub fn common_labels(cr: &InstanceRef, name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = back_reference(cr);
    labels.insert(LABEL_NAME.to_string(), name.to_string());
    labels.insert(LABEL_PART_OF.to_string(), PART_OF_ARGOCD.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        crate::constants::OPERATOR_NAME.to_string(),
    );
    labels
}

/// Object metadata for a managed object
///
/// `namespace: None` marks a cluster-scoped object, which also gets the
/// back-reference as annotations for the cluster RBAC mapper.
#[must_use]
pub fn object_meta(
    cr: &InstanceRef,
    name: &str,
    namespace: Option<&str>,
    component: &str,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(ToString::to_string),
        labels: Some(common_labels(cr, name, component)),
        annotations: namespace.is_none().then(|| back_reference(cr)),
        ..ObjectMeta::default()
    }
}

/// Pod selector labels for a component workload
#[must_use]
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_NAME.to_string(), name.to_string())])
}
