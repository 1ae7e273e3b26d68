//! Update predicates. Each returns true when the change from `old` to `new`
//! can affect what an instance reconciles.

use crate::controller::labels::{MANAGED_BY_NAMESPACE, SOURCE_NAMESPACE_CLAIM};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::ResourceExt;

fn available_replicas(deploy: &Deployment) -> i32 {
    deploy
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

/// Spec or label changes, or availability crossing zero
#[must_use]
pub fn deployment_changed(old: &Deployment, new: &Deployment) -> bool {
    old.metadata.generation != new.metadata.generation
        || old.labels() != new.labels()
        || (available_replicas(old) == 0) != (available_replicas(new) == 0)
}

/// Either namespace claim label changed
#[must_use]
pub fn namespace_claims_changed(old: &Namespace, new: &Namespace) -> bool {
    [MANAGED_BY_NAMESPACE, SOURCE_NAMESPACE_CLAIM]
        .iter()
        .any(|label| old.labels().get(*label) != new.labels().get(*label))
}

#[must_use]
pub fn cluster_role_changed(old: &ClusterRole, new: &ClusterRole) -> bool {
    old.rules != new.rules || old.labels() != new.labels()
}

#[must_use]
pub fn cluster_role_binding_changed(old: &ClusterRoleBinding, new: &ClusterRoleBinding) -> bool {
    old.role_ref != new.role_ref || old.subjects != new.subjects || old.labels() != new.labels()
}

#[must_use]
pub fn cluster_secret_changed(old: &Secret, new: &Secret) -> bool {
    old.labels() != new.labels() || old.data != new.data
}

#[must_use]
pub fn tls_secret_changed(old: &Secret, new: &Secret) -> bool {
    old.data != new.data
}

#[must_use]
pub fn config_map_data_changed(old: &ConfigMap, new: &ConfigMap) -> bool {
    old.data != new.data || old.binary_data != new.binary_data
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn deployment(generation: i64, available: Option<i32>) -> Deployment {
        let mut deploy = Deployment::default();
        deploy.metadata.generation = Some(generation);
        deploy.status = Some(DeploymentStatus {
            available_replicas: available,
            ..DeploymentStatus::default()
        });
        deploy
    }

    #[test]
    fn test_deployment_replica_crossing() {
        assert!(!deployment_changed(&deployment(1, Some(1)), &deployment(1, Some(3))));
        assert!(deployment_changed(&deployment(1, None), &deployment(1, Some(1))));
        assert!(deployment_changed(&deployment(1, Some(2)), &deployment(1, Some(0))));
        assert!(deployment_changed(&deployment(1, Some(1)), &deployment(2, Some(1))));
    }

    #[test]
    fn test_namespace_ignores_unrelated_labels() {
        let mut old = Namespace::default();
        let mut new = old.clone();
        new.labels_mut().insert("team".into(), "a".into());
        assert!(!namespace_claims_changed(&old, &new));

        new.labels_mut()
            .insert(SOURCE_NAMESPACE_CLAIM.into(), "argocd".into());
        assert!(namespace_claims_changed(&old, &new));

        old.labels_mut()
            .insert(SOURCE_NAMESPACE_CLAIM.into(), "argocd".into());
        assert!(!namespace_claims_changed(&old, &new));
    }

    #[test]
    fn test_tls_secret_ignores_labels() {
        let old = Secret::default();
        let mut new = old.clone();
        new.labels_mut().insert("x".into(), "y".into());
        assert!(!tls_secret_changed(&old, &new));
        assert!(cluster_secret_changed(&old, &new));
    }

    #[test]
    fn test_config_map_follows_data_only() {
        let old = ConfigMap::default();
        let mut new = old.clone();
        new.labels_mut().insert("x".into(), "y".into());
        assert!(!config_map_data_changed(&old, &new));

        new.data = Some([("cert".to_string(), "ca".to_string())].into());
        assert!(config_map_data_changed(&old, &new));
    }
}
