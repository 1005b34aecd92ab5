//! Capability contract of the declarative API store.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::core::{DynamicObject, GroupVersionKind};

use crate::{ObjectKey, StoreError};

/// Get/list/create/update/delete by namespaced key, with server-assigned
/// resource versions used for optimistic concurrency.
///
/// Objects travel untyped; typed resources convert through serde at the edges.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject, StoreError>;

    /// List objects of a kind, optionally within a namespace, whose labels contain all of `labels`.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace an object. Fails with `Conflict` when `metadata.resourceVersion` is stale and
    /// with `Invalid` when it is missing or an immutable field changed.
    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace only the status stanza, same version discipline as `update`.
    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn ObjectStore>;
