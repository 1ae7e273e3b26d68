//! # Diff & Apply Engine
//!
//! One create-or-update-or-delete primitive shared by every managed kind.
//!
//! Each desired object declares which fields the operator owns through a list
//! of [`Compare`] entries. Only those fields are compared against the live
//! object, so server-managed fields (status, resourceVersion, defaults) never
//! cause churn. A drifted field is overwritten with the desired value and the
//! object is updated in place; a drifted immutable field forces a delete and
//! re-create.
//!
//! Applying the same intent twice performs no write the second time.

use crate::cluster::{ClusterApi, ClusterError, Kind, ObjectKey};
use crate::controller::hooks::HookRegistry;
use crate::crd::ArgoCD;
use crate::observability;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

/// A field of the object owned by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Labels,
    Annotations,
    /// JSON pointer into the object, for example `/spec` or `/data`
    Path(&'static str),
}

impl Field {
    fn pointer(self) -> &'static str {
        match self {
            Field::Labels => "/metadata/labels",
            Field::Annotations => "/metadata/annotations",
            Field::Path(pointer) => pointer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// Live value must equal the desired value; extra keys are removed
    Exact,
    /// Desired value must be contained in the live value; extra keys and
    /// server defaults are tolerated
    Subset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compare {
    pub field: Field,
    pub mode: Match,
    /// A change can only be applied by re-creating the object
    pub immutable: bool,
}

impl Compare {
    #[must_use]
    pub const fn exact(field: Field) -> Self {
        Self {
            field,
            mode: Match::Exact,
            immutable: false,
        }
    }

    #[must_use]
    pub const fn subset(field: Field) -> Self {
        Self {
            field,
            mode: Match::Subset,
            immutable: false,
        }
    }

    #[must_use]
    pub const fn immutable(self) -> Self {
        Self {
            immutable: true,
            ..self
        }
    }
}

/// Objects whose content is generated once and never overwritten
pub const LABELS_ONLY: &[Compare] = &[Compare::subset(Field::Labels)];

/// A fully built object the instance should have
#[derive(Debug, Clone)]
pub struct Desired {
    pub key: ObjectKey,
    pub object: DynamicObject,
    pub compare: &'static [Compare],
}

impl Desired {
    /// Build from a typed object; the key is taken from its metadata
    pub fn new<K: Resource + Serialize>(
        kind: Kind,
        obj: &K,
        compare: &'static [Compare],
    ) -> Result<Self, ClusterError> {
        let object = crate::cluster::to_dynamic(obj)?;
        Ok(Self {
            key: ObjectKey::of(kind, &object),
            object,
            compare,
        })
    }

    /// Build from raw JSON, for kinds without typed bindings
    pub fn from_json(
        kind: Kind,
        value: Value,
        compare: &'static [Compare],
    ) -> Result<Self, ClusterError> {
        let object: DynamicObject =
            serde_json::from_value(value).map_err(|source| ClusterError::Conversion {
                what: kind.to_string(),
                source,
            })?;
        Ok(Self {
            key: ObjectKey::of(kind, &object),
            object,
            compare,
        })
    }
}

/// What a handler wants done with one object
#[derive(Debug, Clone)]
pub enum Intent {
    Present(Desired),
    /// The controlling feature is off; delete the object if it exists
    Absent(ObjectKey),
}

impl Intent {
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        match self {
            Intent::Present(desired) => &desired.key,
            Intent::Absent(key) => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Recreated,
    Unchanged,
    Deleted,
    Absent,
}

impl Outcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Recreated => "recreated",
            Outcome::Unchanged => "unchanged",
            Outcome::Deleted => "deleted",
            Outcome::Absent => "absent",
        }
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, Outcome::Unchanged | Outcome::Absent)
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    /// A registered hook refused the object; carries the hook's own error
    #[error(transparent)]
    Hook(anyhow::Error),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Applies intents on behalf of one instance
pub struct Applier<'a> {
    cluster: &'a dyn ClusterApi,
    hooks: &'a HookRegistry,
    cr: &'a ArgoCD,
}

impl std::fmt::Debug for Applier<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applier")
            .field("instance", &self.cr.name_any())
            .finish_non_exhaustive()
    }
}

impl<'a> Applier<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterApi, hooks: &'a HookRegistry, cr: &'a ArgoCD) -> Self {
        Self { cluster, hooks, cr }
    }

    /// Converge one object; `hint` names the component for hooks and logs
    pub async fn apply(&self, intent: Intent, hint: &str) -> Result<Outcome, ApplyError> {
        let key = intent.key().clone();
        let outcome = match intent {
            Intent::Present(desired) => self.ensure(desired, hint).await?,
            Intent::Absent(key) => self.remove(&key).await?,
        };

        observability::metrics::increment_resource_operations(key.kind.as_str(), outcome.as_str());
        if outcome.is_write() {
            info!(component = hint, "{} {}", key, outcome.as_str());
        } else {
            debug!(component = hint, "{} {}", key, outcome.as_str());
        }
        Ok(outcome)
    }

    /// Apply intents in order, stopping at the first failure
    pub async fn apply_all(
        &self,
        intents: Vec<Intent>,
        hint: &str,
    ) -> Result<Vec<(ObjectKey, Outcome)>, ApplyError> {
        let mut outcomes = Vec::with_capacity(intents.len());
        for intent in intents {
            let key = intent.key().clone();
            let outcome = self.apply(intent, hint).await?;
            outcomes.push((key, outcome));
        }
        Ok(outcomes)
    }

    async fn ensure(&self, desired: Desired, hint: &str) -> Result<Outcome, ApplyError> {
        let Desired {
            key,
            mut object,
            compare,
        } = desired;

        self.hooks
            .apply(self.cr, &mut object, hint)
            .map_err(ApplyError::Hook)?;

        let Some(existing) = self.cluster.get(&key).await? else {
            self.create(&key, object).await?;
            return Ok(Outcome::Created);
        };

        let desired_value = encode(&key, &object)?;
        let mut live_value = encode(&key, &existing)?;
        let drifted: Vec<Compare> = compare
            .iter()
            .copied()
            .filter(|c| differs(&desired_value, &live_value, *c))
            .collect();

        if drifted.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        if drifted.iter().any(|c| c.immutable) {
            debug!("{} has drifted immutable fields, re-creating", key);
            self.cluster.delete(&key).await?;
            self.create(&key, object).await?;
            return Ok(Outcome::Recreated);
        }

        for c in &drifted {
            converge(&mut live_value, &desired_value, *c);
        }
        let updated: DynamicObject =
            serde_json::from_value(live_value).map_err(|source| ClusterError::Conversion {
                what: key.to_string(),
                source,
            })?;
        self.cluster.replace(&key, &updated).await?;
        Ok(Outcome::Updated)
    }

    async fn create(&self, key: &ObjectKey, mut object: DynamicObject) -> Result<(), ApplyError> {
        // owner references cannot cross namespaces
        if key.namespace.is_some() && key.namespace == self.cr.namespace() {
            if let Some(owner) = self.cr.controller_owner_ref(&()) {
                object.metadata.owner_references = Some(vec![owner]);
            }
        }
        object.metadata.resource_version = None;
        self.cluster.create(key, &object).await?;
        Ok(())
    }

    async fn remove(&self, key: &ObjectKey) -> Result<Outcome, ApplyError> {
        Ok(if self.cluster.delete(key).await? {
            Outcome::Deleted
        } else {
            Outcome::Absent
        })
    }
}

fn encode(key: &ObjectKey, obj: &DynamicObject) -> Result<Value, ClusterError> {
    serde_json::to_value(obj).map_err(|source| ClusterError::Conversion {
        what: key.to_string(),
        source,
    })
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn meaningful(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !is_empty(v))
}

fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(l)) => d.iter().all(|(k, v)| match l.get(k) {
            Some(lv) => is_subset(v, lv),
            None => is_empty(v),
        }),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| is_subset(dv, lv))
        }
        (d, l) => d == l,
    }
}

fn differs(desired: &Value, live: &Value, compare: Compare) -> bool {
    let pointer = compare.field.pointer();
    let wanted = meaningful(desired.pointer(pointer));
    let current = meaningful(live.pointer(pointer));
    match compare.mode {
        Match::Exact => wanted != current,
        Match::Subset => match (wanted, current) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(w), Some(c)) => !is_subset(w, c),
        },
    }
}

fn converge(live: &mut Value, desired: &Value, compare: Compare) {
    let pointer = compare.field.pointer();
    let tokens: Vec<&str> = pointer.split('/').skip(1).collect();
    let wanted = meaningful(desired.pointer(pointer)).cloned();
    match (compare.mode, wanted) {
        (Match::Exact, Some(value)) => set_path(live, &tokens, value),
        (Match::Exact, None) => remove_path(live, &tokens),
        (Match::Subset, Some(value)) => match live.pointer_mut(pointer) {
            Some(slot) if !slot.is_null() => deep_merge(slot, &value),
            _ => set_path(live, &tokens, value),
        },
        (Match::Subset, None) => {}
    }
}

fn set_path(target: &mut Value, tokens: &[&str], value: Value) {
    let Some((first, rest)) = tokens.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        set_path(
            map.entry((*first).to_string()).or_insert(Value::Null),
            rest,
            value,
        );
    }
}

fn remove_path(target: &mut Value, tokens: &[&str]) {
    let Some((last, parents)) = tokens.split_last() else {
        return;
    };
    let parent = if parents.is_empty() {
        Some(target)
    } else {
        target.pointer_mut(&format!("/{}", parents.join("/")))
    };
    if let Some(Value::Object(map)) = parent {
        map.remove(*last);
    }
}

fn deep_merge(target: &mut Value, source: &Value) {
    match source {
        Value::Object(entries) if target.is_object() => {
            if let Value::Object(map) = target {
                for (k, v) in entries {
                    match map.get_mut(k) {
                        Some(slot) => deep_merge(slot, v),
                        None => {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }
        Value::Array(items)
            if target
                .as_array()
                .is_some_and(|existing| existing.len() == items.len()) =>
        {
            if let Value::Array(existing) = target {
                for (slot, item) in existing.iter_mut().zip(items) {
                    deep_merge(slot, item);
                }
            }
        }
        _ => *target = source.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeCluster;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    const CM_COMPARE: &[Compare] = &[
        Compare::subset(Field::Labels),
        Compare::exact(Field::Path("/data")),
    ];
    const RB_COMPARE: &[Compare] = &[
        Compare::subset(Field::Labels),
        Compare::exact(Field::Path("/roleRef")).immutable(),
    ];

    fn instance() -> ArgoCD {
        let mut cr = ArgoCD::new("example", Default::default());
        cr.metadata.namespace = Some("argocd".into());
        cr.metadata.uid = Some("cr-uid".into());
        cr
    }

    fn config_map(data: &[(&str, &str)]) -> Intent {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("argocd-cm".into()),
                namespace: Some("argocd".into()),
                labels: Some(BTreeMap::from([("app".to_string(), "argocd".to_string())])),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ConfigMap::default()
        };
        Intent::Present(Desired::new(Kind::ConfigMap, &cm, CM_COMPARE).unwrap())
    }

    fn cm_key() -> ObjectKey {
        ObjectKey::namespaced(Kind::ConfigMap, "argocd", "argocd-cm")
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let cr = instance();
        let applier = Applier::new(&cluster, &hooks, &cr);

        let desired = || config_map(&[("url", "https://argocd.example.com")]);
        let first = applier.apply(desired(), "config").await.unwrap();
        assert_eq!(first, Outcome::Created);
        let stored = cluster.object(&cm_key()).unwrap();
        assert_eq!(cluster.write_count(), 1);

        let second = applier.apply(desired(), "config").await.unwrap();
        assert_eq!(second, Outcome::Unchanged);
        assert_eq!(cluster.write_count(), 1, "no-op apply must not write");
        assert_eq!(cluster.object(&cm_key()).unwrap().data, stored.data);
    }

    #[tokio::test]
    async fn test_create_sets_owner_reference_in_instance_namespace() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let cr = instance();
        Applier::new(&cluster, &hooks, &cr)
            .apply(config_map(&[]), "config")
            .await
            .unwrap();

        let owners = cluster
            .object(&cm_key())
            .unwrap()
            .metadata
            .owner_references
            .unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "ArgoCD");
        assert_eq!(owners[0].uid, "cr-uid");
    }

    #[tokio::test]
    async fn test_drift_is_converged() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let cr = instance();
        let applier = Applier::new(&cluster, &hooks, &cr);
        applier.apply(config_map(&[("url", "https://a")]), "config").await.unwrap();

        cluster.modify(&cm_key(), |obj| {
            obj["data"]["url"] = json!("https://tampered");
            obj["data"]["extra"] = json!("injected");
            obj["metadata"]["labels"]["team"] = json!("platform");
        });

        let outcome = applier.apply(config_map(&[("url", "https://a")]), "config").await.unwrap();
        assert_eq!(outcome, Outcome::Updated);

        let live = cluster.object(&cm_key()).unwrap();
        assert_eq!(live.data["data"], json!({"url": "https://a"}));
        // labels are compared as a subset, foreign labels survive
        let labels = live.metadata.labels.unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(labels.get("app").map(String::as_str), Some("argocd"));
    }

    #[tokio::test]
    async fn test_immutable_drift_recreates() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let cr = instance();
        let applier = Applier::new(&cluster, &hooks, &cr);

        let binding = |role_kind: &str, role: &str| {
            let rb = RoleBinding {
                metadata: ObjectMeta {
                    name: Some("example-argocd-server".into()),
                    namespace: Some("argocd".into()),
                    ..ObjectMeta::default()
                },
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".into(),
                    kind: role_kind.into(),
                    name: role.into(),
                },
                subjects: None,
            };
            Intent::Present(Desired::new(Kind::RoleBinding, &rb, RB_COMPARE).unwrap())
        };

        applier.apply(binding("Role", "example-argocd-server"), "server").await.unwrap();
        let outcome = applier.apply(binding("ClusterRole", "custom-role"), "server").await.unwrap();
        assert_eq!(outcome, Outcome::Recreated);

        let key = ObjectKey::namespaced(Kind::RoleBinding, "argocd", "example-argocd-server");
        let live: RoleBinding = cluster.typed(&key).unwrap();
        assert_eq!(live.role_ref.kind, "ClusterRole");
        assert_eq!(live.role_ref.name, "custom-role");
    }

    #[tokio::test]
    async fn test_absent_intent_deletes_and_tolerates_missing() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        let cr = instance();
        let applier = Applier::new(&cluster, &hooks, &cr);
        applier.apply(config_map(&[]), "config").await.unwrap();

        let deleted = applier.apply(Intent::Absent(cm_key()), "config").await.unwrap();
        assert_eq!(deleted, Outcome::Deleted);
        assert!(!cluster.contains(&cm_key()));

        let again = applier.apply(Intent::Absent(cm_key()), "config").await.unwrap();
        assert_eq!(again, Outcome::Absent);
    }

    #[tokio::test]
    async fn test_hook_error_prevents_persistence() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        hooks.register(|_, _, hint| {
            if hint == "config" {
                anyhow::bail!("config objects are frozen")
            }
            Ok(())
        });
        let cr = instance();
        let err = Applier::new(&cluster, &hooks, &cr)
            .apply(config_map(&[("a", "b")]), "config")
            .await
            .unwrap_err();

        match err {
            ApplyError::Hook(e) => assert_eq!(e.to_string(), "config objects are frozen"),
            other => panic!("expected hook error, got {other:?}"),
        }
        assert_eq!(cluster.write_count(), 0);
        assert!(!cluster.contains(&cm_key()));
    }

    #[tokio::test]
    async fn test_hook_mutation_is_persisted() {
        let cluster = FakeCluster::new();
        let hooks = HookRegistry::new();
        hooks.register(|_, obj, _| {
            obj.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert("example.com/audited".into(), "true".into());
            Ok(())
        });
        let cr = instance();
        Applier::new(&cluster, &hooks, &cr)
            .apply(config_map(&[]), "config")
            .await
            .unwrap();
        let annotations = cluster.object(&cm_key()).unwrap().metadata.annotations.unwrap();
        assert_eq!(
            annotations.get("example.com/audited").map(String::as_str),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_cluster_failure_propagates() {
        let cluster = FakeCluster::new();
        cluster.fail_on("create", Kind::ConfigMap, "etcd unavailable");
        let hooks = HookRegistry::new();
        let cr = instance();
        let err = Applier::new(&cluster, &hooks, &cr)
            .apply(config_map(&[]), "config")
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Cluster(ClusterError::Rejected(_))));
    }

    #[test]
    fn test_subset_tolerates_server_defaults() {
        let desired = json!({"spec": {"ports": [{"port": 80}], "selector": {"app": "x"}}});
        let live = json!({"spec": {
            "ports": [{"port": 80, "protocol": "TCP", "targetPort": 80}],
            "selector": {"app": "x"},
            "clusterIP": "10.0.0.1"
        }});
        assert!(!differs(&desired, &live, Compare::subset(Field::Path("/spec"))));
        assert!(differs(&desired, &live, Compare::exact(Field::Path("/spec"))));
    }

    #[test]
    fn test_subset_merge_keeps_defaults() {
        let desired = json!({"spec": {"ports": [{"port": 8080}]}});
        let mut live = json!({
            "spec": {"ports": [{"port": 80, "protocol": "TCP"}], "clusterIP": "10.0.0.1"}
        });
        converge(&mut live, &desired, Compare::subset(Field::Path("/spec")));
        assert_eq!(
            live,
            json!({"spec": {"ports": [{"port": 8080, "protocol": "TCP"}], "clusterIP": "10.0.0.1"}})
        );
    }

    #[test]
    fn test_exact_removal_of_unset_field() {
        let desired = json!({"metadata": {"name": "x"}});
        let mut live = json!({"metadata": {"name": "x", "annotations": {"a": "b"}}});
        assert!(differs(&desired, &live, Compare::exact(Field::Annotations)));
        converge(&mut live, &desired, Compare::exact(Field::Annotations));
        assert_eq!(live, json!({"metadata": {"name": "x"}}));
    }
}
