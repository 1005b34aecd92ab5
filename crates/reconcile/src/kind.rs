//! Per-kind capabilities of the resources the engine manages.

use std::fmt::Debug;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use keel_core::gvk_of;
use keel_patch::{meta, DiffStrategy};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A resource kind the engine can create, patch and delete.
pub trait ManagedResource: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync {
    /// `None` when the kind cannot be determined, e.g. an untyped object without `apiVersion`.
    fn gvk(&self) -> Option<GroupVersionKind>;

    fn diff_strategy(&self) -> DiffStrategy;

    /// Copy fields the server forbids changing from the live object into an update.
    fn preserve_immutable(&mut self, _current: &Self) {}
}

impl ManagedResource for Service {
    fn gvk(&self) -> Option<GroupVersionKind> { Some(gvk_of::<Service>()) }

    fn diff_strategy(&self) -> DiffStrategy { DiffStrategy::Strategic(&meta::SERVICE) }

    fn preserve_immutable(&mut self, current: &Self) {
        let Some(live) = current.spec.as_ref() else { return };
        let spec = self.spec.get_or_insert_with(Default::default);
        spec.cluster_ip = live.cluster_ip.clone();
        spec.cluster_ips = live.cluster_ips.clone();
    }
}

impl ManagedResource for Deployment {
    fn gvk(&self) -> Option<GroupVersionKind> { Some(gvk_of::<Deployment>()) }

    fn diff_strategy(&self) -> DiffStrategy { DiffStrategy::Strategic(&meta::DEPLOYMENT) }
}

impl ManagedResource for DynamicObject {
    fn gvk(&self) -> Option<GroupVersionKind> {
        let types = self.types.as_ref()?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", types.api_version.as_str()),
        };
        (!version.is_empty() && !types.kind.is_empty()).then(|| GroupVersionKind::gvk(group, version, &types.kind))
    }

    fn diff_strategy(&self) -> DiffStrategy {
        self.gvk().map_or(DiffStrategy::JsonMerge, |gvk| strategy_for(&gvk))
    }
}

/// Strategic merge for the built-in kinds with a merge-key table, JSON merge for everything else.
pub fn strategy_for(gvk: &GroupVersionKind) -> DiffStrategy {
    if *gvk == gvk_of::<Service>() {
        DiffStrategy::Strategic(&meta::SERVICE)
    } else if *gvk == gvk_of::<Deployment>() {
        DiffStrategy::Strategic(&meta::DEPLOYMENT)
    } else {
        DiffStrategy::JsonMerge
    }
}

pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}

pub fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(obj)?)
}
