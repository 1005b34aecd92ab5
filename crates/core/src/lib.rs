//! Keel core types: object identity, desired state, the store capability and engine config.

#![forbid(unsafe_code)]

use std::fmt;

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod crd;
pub mod error;
pub mod store;

pub use config::{EngineConfig, LabelKeys, NamespacePolicy};
pub use error::StoreError;
pub use store::{ObjectStore, SharedStore};

/// Namespaced identity of an object in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    /// Key of an object from its metadata; `None` when the object carries no name.
    pub fn from_meta(meta: &kube::core::ObjectMeta) -> Option<Self> {
        let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
        Some(Self::new(meta.namespace.as_deref(), name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Whether the engine should ensure a resource exists or is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    #[default]
    Present,
    Absent,
}

/// Stable string form of a GVK: `v1/Kind` for the core group, `group/v1/Kind` otherwise.
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

/// GVK of a statically typed resource.
pub fn gvk_of<K: kube::Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}
