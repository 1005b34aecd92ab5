//! Keel kubehub: the object store backed by a Kubernetes API server, plus the watch event source.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use keel_core::{gvk_key, ObjectKey, ObjectStore, StoreError};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{self, Scope},
    Client,
};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub mod watch;

pub use watch::run_event_source;

/// Map a client error onto the store taxonomy.
pub fn store_error(e: kube::Error, what: &str) -> StoreError {
    match e {
        kube::Error::Api(resp) => {
            let msg = format!("{}: {}", what, resp.message);
            match resp.code {
                404 => StoreError::NotFound(msg),
                409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists(msg),
                409 => StoreError::Conflict(msg),
                422 => StoreError::Invalid(msg),
                _ => StoreError::Unavailable(format!("{} ({} {})", msg, resp.code, resp.reason)),
            }
        }
        kube::Error::SerdeError(e) => StoreError::Malformed(format!("{}: {}", what, e)),
        other => StoreError::Unavailable(format!("{}: {}", what, other)),
    }
}

/// [`ObjectStore`] talking to the API server. Kinds are resolved once through discovery.
pub struct KubeStore {
    client: Client,
    resolved: RwLock<FxHashMap<String, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, resolved: RwLock::new(FxHashMap::default()) }
    }

    async fn resource(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), StoreError> {
        let k = gvk_key(gvk);
        if let Some(hit) = self.resolved.read().await.get(&k) {
            return Ok(hit.clone());
        }
        let (ar, caps) = discovery::pinned_kind(&self.client, gvk).await.map_err(|e| store_error(e, &k))?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        info!(gvk = %k, namespaced, "resolved api resource");
        self.resolved.write().await.insert(k, (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, namespaced) = self.resource(gvk).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }
}

fn name_of(obj: &DynamicObject) -> Result<&str, StoreError> {
    obj.metadata.name.as_deref().ok_or_else(|| StoreError::Invalid("metadata.name: Required value".into()))
}

fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let api = self.api(gvk, key.namespace.as_deref()).await?;
        api.get(&key.name).await.map_err(|e| store_error(e, &format!("get {} {}", gvk.kind, key)))
    }

    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>, labels: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>, StoreError> {
        let api = self.api(gvk, namespace).await?;
        let mut lp = ListParams::default();
        if !labels.is_empty() {
            lp = lp.labels(&selector_string(labels));
        }
        let list = api.list(&lp).await.map_err(|e| store_error(e, &format!("list {}", gvk.kind)))?;
        debug!(kind = %gvk.kind, ns = ?namespace, count = list.items.len(), "listed");
        Ok(list.items)
    }

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let api = self.api(gvk, obj.metadata.namespace.as_deref()).await?;
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| store_error(e, &format!("create {} {}", gvk.kind, obj.metadata.name.as_deref().unwrap_or_default())))
    }

    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let name = name_of(obj)?;
        let api = self.api(gvk, obj.metadata.namespace.as_deref()).await?;
        api.replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| store_error(e, &format!("update {} {}", gvk.kind, name)))
    }

    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let name = name_of(obj)?;
        let api = self.api(gvk, obj.metadata.namespace.as_deref()).await?;
        let body = serde_json::to_vec(obj).map_err(|e| StoreError::Malformed(e.to_string()))?;
        api.replace_status(name, &PostParams::default(), body)
            .await
            .map_err(|e| store_error(e, &format!("update status of {} {}", gvk.kind, name)))
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), StoreError> {
        let api = self.api(gvk, key.namespace.as_deref()).await?;
        api.delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| store_error(e, &format!("delete {} {}", gvk.kind, key)))
    }
}
