//! # Namespace Tenancy
//!
//! Computes, every cycle, the namespaces an instance may place RBAC into:
//!
//! - **managed** namespaces carry `argocd.argoproj.io/managed-by=<instance ns>`;
//!   the instance namespace is always managed
//! - **source** namespaces are listed in `spec.sourceNamespaces` and claimed
//!   through `argocd.argoproj.io/managed-by-cluster-argocd=<instance ns>`
//!
//! Claims are first-come: a namespace already claimed for another instance
//! namespace is never taken over and is reported as a [`LostClaim`].
//! Pruning removes typed RBAC from namespaces that left either set and
//! releases claims that are no longer listed.

use crate::cluster::{labels_of, ClusterApi, ClusterError, Kind, ObjectKey};
use crate::controller::labels::{
    InstanceRef, MANAGED_BY_NAMESPACE, RBAC_APP_MANAGEMENT, RBAC_RESOURCE_MANAGEMENT, RBAC_TYPE,
    SOURCE_NAMESPACE_CLAIM,
};
use crate::crd::ArgoCD;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A listed source namespace already claimed for another instance namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostClaim {
    pub namespace: String,
    pub claimed_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSets {
    pub managed: BTreeSet<String>,
    pub source: BTreeSet<String>,
    pub lost: Vec<LostClaim>,
}

impl NamespaceSets {
    /// Comma separated names of contested namespaces
    #[must_use]
    pub fn lost_names(&self) -> String {
        self.lost
            .iter()
            .map(|l| l.namespace.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Per-instance view of namespace ownership
pub struct Tenancy<'a> {
    cluster: &'a dyn ClusterApi,
    cr: &'a ArgoCD,
    instance: InstanceRef,
}

impl std::fmt::Debug for Tenancy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tenancy")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

fn label_patch(key: &str, value: Option<&str>) -> Value {
    json!({ "metadata": { "labels": { key: value } } })
}

impl<'a> Tenancy<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterApi, cr: &'a ArgoCD) -> Self {
        Self {
            cluster,
            cr,
            instance: InstanceRef::of(cr),
        }
    }

    fn listed_sources(&self) -> BTreeSet<String> {
        source_namespaces(self.cr).collect()
    }

    /// Scan namespaces and claim unclaimed source namespaces
    pub async fn compute(&self) -> Result<NamespaceSets, ClusterError> {
        let home = self.instance.namespace.clone();
        let mut sets = NamespaceSets::default();

        let selector = format!("{MANAGED_BY_NAMESPACE}={home}");
        for ns in self
            .cluster
            .list(Kind::Namespace, None, Some(&selector))
            .await?
        {
            if let Some(name) = ns.metadata.name {
                sets.managed.insert(name);
            }
        }
        sets.managed.insert(home.clone());

        for name in self.listed_sources() {
            let key = ObjectKey::cluster(Kind::Namespace, name.as_str());
            let Some(ns) = self.cluster.get(&key).await? else {
                debug!(namespace = %name, "Source namespace does not exist, skipping");
                continue;
            };
            match labels_of(&ns).get(SOURCE_NAMESPACE_CLAIM).map(String::as_str) {
                Some(owner) if owner == home => {
                    sets.source.insert(name);
                }
                Some(owner) if !owner.is_empty() => {
                    warn!(
                        namespace = %name,
                        claimed_by = %owner,
                        "Source namespace is already claimed by another Argo CD instance"
                    );
                    sets.lost.push(LostClaim {
                        namespace: name,
                        claimed_by: owner.to_string(),
                    });
                }
                _ => {
                    self.cluster
                        .patch(&key, &label_patch(SOURCE_NAMESPACE_CLAIM, Some(&home)))
                        .await?;
                    info!(namespace = %name, "Claimed source namespace for {}", self.instance);
                    sets.source.insert(name);
                }
            }
        }

        Ok(sets)
    }

    /// Delete typed RBAC outside the current sets and release unlisted claims
    ///
    /// Returns the number of deleted RBAC objects.
    pub async fn prune(&self, sets: &NamespaceSets) -> Result<usize, ClusterError> {
        let selector = format!("{},{RBAC_TYPE}", self.instance.selector());
        let mut deleted = 0;
        for kind in [Kind::RoleBinding, Kind::Role] {
            for obj in self.cluster.list(kind, None, Some(&selector)).await? {
                let key = ObjectKey::of(kind, &obj);
                let namespace = key.namespace.clone().unwrap_or_default();
                let keep = match labels_of(&obj).get(RBAC_TYPE).map(String::as_str) {
                    Some(RBAC_RESOURCE_MANAGEMENT) => sets.managed.contains(&namespace),
                    Some(RBAC_APP_MANAGEMENT) => sets.source.contains(&namespace),
                    _ => true,
                };
                if !keep && self.cluster.delete(&key).await? {
                    info!("Pruned {} from namespace that left the instance", key);
                    deleted += 1;
                }
            }
        }

        let still_listed = self.sources_listed_by_neighbours().await?;
        let claimed = format!("{SOURCE_NAMESPACE_CLAIM}={}", self.instance.namespace);
        for ns in self
            .cluster
            .list(Kind::Namespace, None, Some(&claimed))
            .await?
        {
            let Some(name) = ns.metadata.name else {
                continue;
            };
            if sets.source.contains(&name) || still_listed.contains(&name) {
                continue;
            }
            self.release_claim(&name).await?;
        }
        Ok(deleted)
    }

    /// Teardown: delete RBAC placed in other namespaces, release claims and
    /// optionally strip `managed-by` labels
    pub async fn release_all(&self, strip_managed_by: bool) -> Result<(), ClusterError> {
        let selector = format!("{},{RBAC_TYPE}", self.instance.selector());
        for kind in [Kind::RoleBinding, Kind::Role] {
            for obj in self.cluster.list(kind, None, Some(&selector)).await? {
                let key = ObjectKey::of(kind, &obj);
                self.cluster.delete(&key).await?;
                debug!("Deleted {}", key);
            }
        }

        let neighbours = self.neighbours().await?;
        let still_listed: BTreeSet<String> =
            neighbours.iter().flat_map(source_namespaces).collect();

        let home = &self.instance.namespace;
        let claimed = format!("{SOURCE_NAMESPACE_CLAIM}={home}");
        for ns in self
            .cluster
            .list(Kind::Namespace, None, Some(&claimed))
            .await?
        {
            if let Some(name) = ns.metadata.name {
                if !still_listed.contains(&name) {
                    self.release_claim(&name).await?;
                }
            }
        }

        if strip_managed_by && neighbours.is_empty() {
            let managed = format!("{MANAGED_BY_NAMESPACE}={home}");
            for ns in self
                .cluster
                .list(Kind::Namespace, None, Some(&managed))
                .await?
            {
                let Some(name) = ns.metadata.name else {
                    continue;
                };
                let key = ObjectKey::cluster(Kind::Namespace, name.as_str());
                self.cluster
                    .patch(&key, &label_patch(MANAGED_BY_NAMESPACE, None))
                    .await?;
                info!(namespace = %name, "Removed managed-by label");
            }
        }
        Ok(())
    }

    async fn release_claim(&self, namespace: &str) -> Result<(), ClusterError> {
        let key = ObjectKey::cluster(Kind::Namespace, namespace);
        self.cluster
            .patch(&key, &label_patch(SOURCE_NAMESPACE_CLAIM, None))
            .await?;
        info!(namespace = %namespace, "Released source namespace claim");
        Ok(())
    }

    /// Other instances sharing this instance's namespace; claims are keyed by
    /// namespace so their listings keep a claim alive
    async fn neighbours(&self) -> Result<Vec<ArgoCD>, ClusterError> {
        let mut neighbours = Vec::new();
        for obj in self
            .cluster
            .list(Kind::ArgoCD, Some(&self.instance.namespace), None)
            .await?
        {
            if obj.metadata.name.as_deref() == Some(self.instance.name.as_str()) {
                continue;
            }
            neighbours.push(crate::cluster::from_dynamic::<ArgoCD>(&obj)?);
        }
        Ok(neighbours)
    }

    async fn sources_listed_by_neighbours(&self) -> Result<BTreeSet<String>, ClusterError> {
        Ok(self
            .neighbours()
            .await?
            .iter()
            .flat_map(source_namespaces)
            .collect())
    }
}

/// `spec.sourceNamespaces` trimmed, without blank entries
fn source_namespaces(cr: &ArgoCD) -> impl Iterator<Item = String> + '_ {
    cr.spec
        .source_namespaces
        .iter()
        .map(|ns| ns.trim())
        .filter(|ns| !ns.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use crate::controller::labels::{INSTANCE_NAME, INSTANCE_NAMESPACE};
    use crate::controller::resources::testing::instance;
    use crate::crd::ArgoCDSpec;

    fn namespace(cluster: &FakeCluster, name: &str, labels: &[(&str, &str)]) {
        let labels: serde_json::Map<String, Value> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect();
        cluster.insert_json(
            Kind::Namespace,
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": name, "labels": labels}
            }),
        );
    }

    fn typed_role(cluster: &FakeCluster, ns: &str, name: &str, rbac_type: &str) {
        cluster.insert_json(
            Kind::Role,
            json!({
                "apiVersion": "rbac.authorization.k8s.io/v1",
                "kind": "Role",
                "metadata": {"name": name, "namespace": ns, "labels": {
                    INSTANCE_NAME: "example",
                    INSTANCE_NAMESPACE: "argocd",
                    RBAC_TYPE: rbac_type,
                }},
                "rules": []
            }),
        );
    }

    fn claim_of(cluster: &FakeCluster, ns: &str) -> Option<String> {
        cluster
            .object(&ObjectKey::cluster(Kind::Namespace, ns))
            .and_then(|o| labels_of(&o).get(SOURCE_NAMESPACE_CLAIM).cloned())
    }

    fn with_sources(sources: &[&str]) -> ArgoCD {
        instance(ArgoCDSpec {
            source_namespaces: sources.iter().map(ToString::to_string).collect(),
            ..ArgoCDSpec::default()
        })
    }

    #[tokio::test]
    async fn test_managed_namespaces_include_home() {
        let cluster = FakeCluster::new();
        namespace(&cluster, "argocd", &[]);
        namespace(&cluster, "team-a", &[(MANAGED_BY_NAMESPACE, "argocd")]);
        namespace(&cluster, "team-b", &[(MANAGED_BY_NAMESPACE, "other")]);
        let cr = with_sources(&[]);

        let sets = Tenancy::new(&cluster, &cr).compute().await.unwrap();
        assert_eq!(
            sets.managed.into_iter().collect::<Vec<_>>(),
            vec!["argocd".to_string(), "team-a".to_string()]
        );
        assert!(sets.source.is_empty());
    }

    #[tokio::test]
    async fn test_first_claim_wins() {
        let cluster = FakeCluster::new();
        namespace(&cluster, "apps", &[]);
        namespace(&cluster, "contested", &[(SOURCE_NAMESPACE_CLAIM, "other-argocd")]);
        namespace(&cluster, "mine", &[(SOURCE_NAMESPACE_CLAIM, "argocd")]);
        let cr = with_sources(&["apps", "contested", "mine", "missing"]);

        let sets = Tenancy::new(&cluster, &cr).compute().await.unwrap();
        assert_eq!(
            sets.source.iter().cloned().collect::<Vec<_>>(),
            vec!["apps".to_string(), "mine".to_string()]
        );
        assert_eq!(
            sets.lost,
            vec![LostClaim {
                namespace: "contested".into(),
                claimed_by: "other-argocd".into()
            }]
        );
        assert_eq!(sets.lost_names(), "contested");
        assert_eq!(claim_of(&cluster, "apps").as_deref(), Some("argocd"));
        assert_eq!(claim_of(&cluster, "contested").as_deref(), Some("other-argocd"));
        // the already-claimed namespace was not rewritten
        assert_eq!(cluster.writes_of(Kind::Namespace), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_rbac_and_releases_claims() {
        let cluster = FakeCluster::new();
        namespace(&cluster, "argocd", &[]);
        namespace(&cluster, "kept", &[(SOURCE_NAMESPACE_CLAIM, "argocd")]);
        namespace(&cluster, "dropped", &[(SOURCE_NAMESPACE_CLAIM, "argocd")]);
        typed_role(&cluster, "kept", "example_kept", RBAC_APP_MANAGEMENT);
        typed_role(&cluster, "dropped", "example_dropped", RBAC_APP_MANAGEMENT);
        typed_role(&cluster, "former", "example-argocd-server", RBAC_RESOURCE_MANAGEMENT);
        typed_role(&cluster, "argocd", "example-argocd-server", RBAC_RESOURCE_MANAGEMENT);
        let cr = with_sources(&["kept"]);

        let tenancy = Tenancy::new(&cluster, &cr);
        let sets = tenancy.compute().await.unwrap();
        let deleted = tenancy.prune(&sets).await.unwrap();

        assert_eq!(deleted, 2);
        assert!(cluster.contains(&ObjectKey::namespaced(Kind::Role, "kept", "example_kept")));
        let role = |ns: &str, name: &str| ObjectKey::namespaced(Kind::Role, ns, name);
        assert!(!cluster.contains(&role("dropped", "example_dropped")));
        assert!(!cluster.contains(&role("former", "example-argocd-server")));
        assert!(cluster.contains(&role("argocd", "example-argocd-server")));
        assert_eq!(claim_of(&cluster, "kept").as_deref(), Some("argocd"));
        assert_eq!(claim_of(&cluster, "dropped"), None);
    }

    #[tokio::test]
    async fn test_release_keeps_claims_listed_by_neighbour() {
        let cluster = FakeCluster::new();
        namespace(&cluster, "shared", &[(SOURCE_NAMESPACE_CLAIM, "argocd")]);
        let mut neighbour = with_sources(&["shared"]);
        neighbour.metadata.name = Some("neighbour".into());
        cluster.insert_typed(Kind::ArgoCD, &neighbour);
        let cr = with_sources(&["shared"]);
        cluster.insert_typed(Kind::ArgoCD, &cr);

        Tenancy::new(&cluster, &cr).release_all(true).await.unwrap();
        assert_eq!(claim_of(&cluster, "shared").as_deref(), Some("argocd"));
    }

    #[tokio::test]
    async fn test_neighbour_listing_with_whitespace_keeps_claim() {
        let cluster = FakeCluster::new();
        namespace(&cluster, "shared", &[(SOURCE_NAMESPACE_CLAIM, "argocd")]);
        let mut neighbour = with_sources(&[" shared "]);
        neighbour.metadata.name = Some("neighbour".into());
        cluster.insert_typed(Kind::ArgoCD, &neighbour);
        let cr = with_sources(&[]);
        cluster.insert_typed(Kind::ArgoCD, &cr);

        let tenancy = Tenancy::new(&cluster, &cr);
        let sets = tenancy.compute().await.unwrap();
        tenancy.prune(&sets).await.unwrap();
        assert_eq!(claim_of(&cluster, "shared").as_deref(), Some("argocd"));

        tenancy.release_all(false).await.unwrap();
        assert_eq!(claim_of(&cluster, "shared").as_deref(), Some("argocd"));
    }

    #[tokio::test]
    async fn test_release_all_strips_labels_when_requested() {
        let cluster = FakeCluster::new();
        namespace(&cluster, "team-a", &[(MANAGED_BY_NAMESPACE, "argocd")]);
        namespace(&cluster, "apps", &[(SOURCE_NAMESPACE_CLAIM, "argocd")]);
        typed_role(&cluster, "apps", "example_apps", RBAC_APP_MANAGEMENT);
        let cr = with_sources(&["apps"]);
        cluster.insert_typed(Kind::ArgoCD, &cr);

        let tenancy = Tenancy::new(&cluster, &cr);
        tenancy.release_all(false).await.unwrap();
        assert!(!cluster.contains(&ObjectKey::namespaced(Kind::Role, "apps", "example_apps")));
        assert_eq!(claim_of(&cluster, "apps"), None);
        let team_a = cluster.object(&ObjectKey::cluster(Kind::Namespace, "team-a")).unwrap();
        assert!(labels_of(&team_a).contains_key(MANAGED_BY_NAMESPACE));

        tenancy.release_all(true).await.unwrap();
        let team_a = cluster.object(&ObjectKey::cluster(Kind::Namespace, "team-a")).unwrap();
        assert!(!labels_of(&team_a).contains_key(MANAGED_BY_NAMESPACE));
    }
}
