//! Reverse lookups from a secondary object to the instances it affects.

use super::InstanceIndex;
use crate::controller::labels::{
    InstanceRef, INSTANCE_NAME, MANAGED_BY_NAMESPACE, SECRET_TYPE, SECRET_TYPE_CLUSTER,
    SOURCE_NAMESPACE_CLAIM,
};
use crate::controller::resources::trust::scm_root_ca_config_map;
use crate::crd::ArgoCD;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::{Resource, ResourceExt};
use kube_runtime::reflector::Store;
use std::collections::BTreeSet;

/// Instances named by ArgoCD owner references in the object's namespace
pub fn owner_instances<K: Resource>(obj: &K) -> Vec<InstanceRef> {
    let Some(namespace) = obj.meta().namespace.as_deref() else {
        return Vec::new();
    };
    obj.owner_references()
        .iter()
        .filter(|o| o.kind == ArgoCD::kind(&()) && o.api_version == ArgoCD::api_version(&()))
        .map(|o| InstanceRef::new(namespace, &o.name))
        .collect()
}

/// Instance recorded in the back-reference annotations of a cluster-scoped object
pub fn annotated_instance<K: Resource>(obj: &K) -> Vec<InstanceRef> {
    InstanceRef::from_back_reference(obj.annotations())
        .into_iter()
        .collect()
}

/// Every instance in the namespaces named by the old or new claim labels
pub fn namespace_instances(
    new: &Namespace,
    old: Option<&Namespace>,
    index: &dyn InstanceIndex,
) -> Vec<InstanceRef> {
    let owners: BTreeSet<&String> = std::iter::once(new)
        .chain(old)
        .flat_map(|ns| {
            [MANAGED_BY_NAMESPACE, SOURCE_NAMESPACE_CLAIM]
                .into_iter()
                .filter_map(move |label| ns.labels().get(label))
        })
        .collect();
    owners
        .into_iter()
        .flat_map(|owner| index.instances_in(owner))
        .collect()
}

/// Every instance in the namespace a cluster secret is claimed for
pub fn cluster_secret_instances(secret: &Secret, index: &dyn InstanceIndex) -> Vec<InstanceRef> {
    let labels = secret.labels();
    if labels.get(SECRET_TYPE).map(String::as_str) != Some(SECRET_TYPE_CLUSTER) {
        return Vec::new();
    }
    labels
        .get(SOURCE_NAMESPACE_CLAIM)
        .map(|ns| index.instances_in(ns))
        .unwrap_or_default()
}

/// Owner of a TLS secret, by owner reference or name annotation
pub fn tls_secret_instances(secret: &Secret) -> Vec<InstanceRef> {
    let owners = owner_instances(secret);
    if !owners.is_empty() {
        return owners;
    }
    match (secret.namespace(), secret.annotations().get(INSTANCE_NAME)) {
        (Some(ns), Some(name)) => vec![InstanceRef::new(ns, name)],
        _ => Vec::new(),
    }
}

/// Instances in the ConfigMap's namespace that use it as the ApplicationSet SCM root CA
pub fn scm_tls_configmap_instances(
    config_map: &ConfigMap,
    index: &Store<ArgoCD>,
) -> Vec<InstanceRef> {
    let Some(namespace) = config_map.namespace() else {
        return Vec::new();
    };
    let name = config_map.name_any();
    index
        .state()
        .iter()
        .filter(|cr| cr.metadata.namespace.as_deref() == Some(namespace.as_str()))
        .filter(|cr| scm_root_ca_config_map(cr) == Some(name.as_str()))
        .map(|cr| InstanceRef::of(cr))
        .collect()
}
