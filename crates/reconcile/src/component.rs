//! Ordered fan-out over the per-kind reconcilers of one top-level object.

use std::collections::BTreeMap;

use keel_core::crd::AdvDeployment;
use keel_core::EngineConfig;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::labels::app_selector;
use crate::{ReconcileError, ResourceReconciler};

/// Derives the desired resources of one kind from the top-level object and converges them.
#[async_trait::async_trait]
pub trait ComponentReconciler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reconcile(&self) -> Result<(), ReconcileError>;
}

/// Run components in order, stopping at the first failure. Earlier components' writes stay.
pub async fn run_components(components: &[&dyn ComponentReconciler]) -> Result<(), ReconcileError> {
    for c in components {
        debug!(component = c.name(), "reconciling component");
        if let Err(e) = c.reconcile().await {
            warn!(component = c.name(), error = %e, "component failed");
            return Err(ReconcileError::Component { component: c.name(), source: Box::new(e) });
        }
    }
    Ok(())
}

/// Existing objects of `gvk` carrying the owner's `app` label in its namespace.
pub async fn list_owned(
    resources: &ResourceReconciler,
    gvk: &GroupVersionKind,
    owner: &AdvDeployment,
    cfg: &EngineConfig,
) -> Result<Vec<DynamicObject>, ReconcileError> {
    let selector: BTreeMap<String, String> = app_selector(owner, cfg);
    let namespace = owner.namespace();
    resources
        .bounded(resources.store().list(gvk, namespace.as_deref(), &selector))
        .await
        .map_err(|e| {
            let key = keel_core::ObjectKey::new(namespace.as_deref(), &owner.name_any());
            ReconcileError::store("list", &gvk.kind, &key, e)
        })
}
