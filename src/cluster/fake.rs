//! In-memory [`ClusterApi`] for unit tests.
//!
//! Records every write, honours finalizers on delete, evaluates equality
//! label selectors and supports injected failures per verb and kind.

use super::{to_dynamic, ClusterApi, ClusterError, Kind, ObjectKey};
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    writes: Vec<(&'static str, ObjectKey)>,
    failures: HashMap<(&'static str, Kind), String>,
    revision: u64,
}

#[derive(Debug, Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake cluster lock poisoned")
    }

    /// Seed an object without recording a write
    pub fn insert(&self, kind: Kind, obj: DynamicObject) {
        let key = ObjectKey::of(kind, &obj);
        let mut state = self.lock();
        let obj = stamp(&mut state, obj);
        state.objects.insert(key, obj);
    }

    pub fn insert_typed<K: Serialize>(&self, kind: Kind, obj: &K) {
        self.insert(kind, to_dynamic(obj).expect("typed object converts"));
    }

    /// Seed from raw JSON (for fields such as deletionTimestamp)
    pub fn insert_json(&self, kind: Kind, obj: Value) {
        self.insert(kind, serde_json::from_value(obj).expect("valid object json"));
    }

    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn typed<K: DeserializeOwned>(&self, key: &ObjectKey) -> Option<K> {
        self.object(key).map(|obj| {
            serde_json::from_value(serde_json::to_value(obj).expect("serializable"))
                .expect("object deserializes into requested type")
        })
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    /// Mutate a stored object in place, bypassing write tracking
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut Value)) {
        let mut state = self.lock();
        let obj = state.objects.get(key).cloned().expect("object to modify exists");
        let mut value = serde_json::to_value(obj).expect("serializable");
        f(&mut value);
        let obj = serde_json::from_value(value).expect("modified object is valid");
        let obj = stamp(&mut state, obj);
        state.objects.insert(key.clone(), obj);
    }

    pub fn keys(&self, kind: Kind) -> Vec<ObjectKey> {
        self.lock()
            .objects
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect()
    }

    pub fn writes(&self) -> Vec<(&'static str, ObjectKey)> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    pub fn writes_of(&self, kind: Kind) -> usize {
        self.lock().writes.iter().filter(|(_, k)| k.kind == kind).count()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn fail_on(&self, verb: &'static str, kind: Kind, message: &str) {
        self.lock()
            .failures
            .insert((verb, kind), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }
}

fn stamp(state: &mut State, mut obj: DynamicObject) -> DynamicObject {
    state.revision += 1;
    obj.metadata.resource_version = Some(state.revision.to_string());
    if obj.metadata.uid.is_none() {
        obj.metadata.uid = Some(format!("uid-{}", state.revision));
    }
    obj
}

fn check(state: &State, verb: &'static str, kind: Kind) -> Result<(), ClusterError> {
    match state.failures.get(&(verb, kind)) {
        Some(message) => Err(ClusterError::Rejected(message.clone())),
        None => Ok(()),
    }
}

fn merge_patch(target: &mut Value, patch: &Value) {
    if let Value::Object(entries) = patch {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        if let Value::Object(map) = target {
            for (k, v) in entries {
                if v.is_null() {
                    map.remove(k);
                } else {
                    merge_patch(map.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
    } else {
        *target = patch.clone();
    }
}

fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once('=') {
                let v = v.trim_start_matches('=');
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else if let Some(k) = term.strip_prefix('!') {
                !labels.contains_key(k.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

fn is_released(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
        && obj.metadata.finalizers.as_ref().is_none_or(Vec::is_empty)
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError> {
        let state = self.lock();
        check(&state, "get", key.kind)?;
        Ok(state.objects.get(key).cloned())
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let state = self.lock();
        check(&state, "list", kind)?;
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, obj)| {
                label_selector.is_none_or(|sel| {
                    selector_matches(sel, &obj.metadata.labels.clone().unwrap_or_default())
                })
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(
        &self,
        key: &ObjectKey,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let mut state = self.lock();
        check(&state, "create", key.kind)?;
        if state.objects.contains_key(key) {
            return Err(ClusterError::Rejected(format!("{key} already exists")));
        }
        let mut obj = obj.clone();
        obj.metadata.namespace.clone_from(&key.namespace);
        obj.metadata.name = Some(key.name.clone());
        obj.metadata.uid = None;
        let obj = stamp(&mut state, obj);
        state.objects.insert(key.clone(), obj.clone());
        state.writes.push(("create", key.clone()));
        Ok(obj)
    }

    async fn replace(
        &self,
        key: &ObjectKey,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let mut state = self.lock();
        check(&state, "replace", key.kind)?;
        let Some(current) = state.objects.get(key) else {
            return Err(ClusterError::Rejected(format!("{key} not found")));
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != current.metadata.resource_version
        {
            return Err(ClusterError::Rejected(format!("{key} conflict")));
        }
        let obj = stamp(&mut state, obj.clone());
        state.writes.push(("replace", key.clone()));
        if is_released(&obj) {
            state.objects.remove(key);
        } else {
            state.objects.insert(key.clone(), obj.clone());
        }
        Ok(obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, ClusterError> {
        let mut state = self.lock();
        check(&state, "delete", key.kind)?;
        let Some(current) = state.objects.get(key).cloned() else {
            return Ok(false);
        };
        state.writes.push(("delete", key.clone()));
        if current.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            let mut value = serde_json::to_value(current).expect("serializable");
            value["metadata"]["deletionTimestamp"] = Value::from("2024-01-01T00:00:00Z");
            let obj = serde_json::from_value(value).expect("valid object");
            let obj = stamp(&mut state, obj);
            state.objects.insert(key.clone(), obj);
        } else {
            state.objects.remove(key);
        }
        Ok(true)
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, ClusterError> {
        let mut state = self.lock();
        check(&state, "patch", key.kind)?;
        let Some(current) = state.objects.get(key).cloned() else {
            return Err(ClusterError::Rejected(format!("{key} not found")));
        };
        if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
            if current.metadata.resource_version.as_deref() != Some(expected) {
                return Err(ClusterError::Rejected(format!("{key} conflict")));
            }
        }
        let mut value = serde_json::to_value(current).expect("serializable");
        merge_patch(&mut value, patch);
        let obj: DynamicObject = serde_json::from_value(value).expect("patched object is valid");
        let obj = stamp(&mut state, obj);
        state.writes.push(("patch", key.clone()));
        if is_released(&obj) {
            state.objects.remove(key);
        } else {
            state.objects.insert(key.clone(), obj.clone());
        }
        Ok(obj)
    }

    async fn patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<(), ClusterError> {
        let mut state = self.lock();
        check(&state, "patch_status", key.kind)?;
        let Some(current) = state.objects.get(key).cloned() else {
            return Err(ClusterError::Rejected(format!("{key} not found")));
        };
        let mut value = serde_json::to_value(current).expect("serializable");
        if let Some(status) = patch.get("status") {
            merge_patch(&mut value["status"], status);
        }
        let obj = serde_json::from_value(value).expect("patched object is valid");
        let obj = stamp(&mut state, obj);
        state.objects.insert(key.clone(), obj);
        state.writes.push(("patch_status", key.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let labels: BTreeMap<String, String> = [
            ("app".to_string(), "argocd".to_string()),
            ("tier".to_string(), "web".to_string()),
        ]
        .into_iter()
        .collect();

        assert!(selector_matches("app=argocd", &labels));
        assert!(selector_matches("app==argocd,tier", &labels));
        assert!(selector_matches("app=argocd,!missing", &labels));
        assert!(selector_matches("tier!=db", &labels));
        assert!(!selector_matches("app=other", &labels));
        assert!(!selector_matches("!tier", &labels));
        assert!(!selector_matches("missing", &labels));
    }

    #[test]
    fn test_merge_patch_removes_null_keys() {
        let mut target = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        merge_patch(&mut target, &serde_json::json!({"a": {"b": null, "e": 4}, "d": null}));
        assert_eq!(target, serde_json::json!({"a": {"c": 2, "e": 4}}));
    }

    #[tokio::test]
    async fn test_patch_with_stale_resource_version_conflicts() {
        let cluster = FakeCluster::new();
        let key = ObjectKey::cluster(Kind::Namespace, "team-a");
        cluster.insert_json(
            Kind::Namespace,
            serde_json::json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": {"name": "team-a"}
            }),
        );
        let read = cluster.object(&key).unwrap().metadata.resource_version;
        cluster.modify(&key, |value| value["metadata"]["labels"] = serde_json::json!({"a": "b"}));

        let relabel = |version: Option<String>| {
            serde_json::json!({"metadata": {"resourceVersion": version, "labels": {"a": "c"}}})
        };
        let stale = relabel(read);
        assert!(cluster.patch(&key, &stale).await.is_err());

        let fresh = cluster.object(&key).unwrap().metadata.resource_version;
        let patched = cluster.patch(&key, &relabel(fresh)).await.unwrap();
        assert_eq!(patched.metadata.labels.unwrap()["a"], "c");
    }
}
