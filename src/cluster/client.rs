//! # Kubernetes Client
//!
//! [`ClusterApi`] implementation over `kube::Api<DynamicObject>`.

use super::{ClusterApi, ClusterError, Kind, ObjectKey};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: Kind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }

    fn api_for(&self, key: &ObjectKey) -> Api<DynamicObject> {
        self.api(key.kind, key.namespace.as_deref())
    }
}

fn failed(verb: &'static str, key: &ObjectKey, source: kube::Error) -> ClusterError {
    ClusterError::Api {
        verb,
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, ClusterError> {
        self.api_for(key)
            .get_opt(&key.name)
            .await
            .map_err(|e| failed("get", key, e))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        self.api(kind, namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|source| ClusterError::Api {
                verb: "list",
                key: format!("{kind} in {}", namespace.unwrap_or("all namespaces")),
                source,
            })
    }

    async fn create(
        &self,
        key: &ObjectKey,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        self.api_for(key)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| failed("create", key, e))
    }

    async fn replace(
        &self,
        key: &ObjectKey,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        self.api_for(key)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| failed("update", key, e))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool, ClusterError> {
        match self
            .api_for(key)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(failed("delete", key, e)),
        }
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, ClusterError> {
        self.api_for(key)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| failed("patch", key, e))
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<(), ClusterError> {
        self.api_for(key)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map(|_| ())
            .map_err(|e| failed("patch status", key, e))
    }
}
