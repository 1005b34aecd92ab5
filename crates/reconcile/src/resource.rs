//! Convergence of a single resource toward its desired state.
//!
//! Missing + Present creates, Present + Absent deletes, and a live object that
//! differs from its desired form is updated with the live version token. An
//! update the server rejects as stale or invalid is resolved once by deleting
//! and recreating from the pristine desired copy.

use std::future::Future;
use std::time::Duration;

use keel_core::{DesiredState, ObjectKey, SharedStore, StoreError};
use keel_patch::{diff_summary, PatchCalculator, PatchResult};
use kube::core::GroupVersionKind;
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::kind::{from_dynamic, to_dynamic, ManagedResource};
use crate::ReconcileError;

/// Which path a reconcile took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOutcome {
    Created,
    Updated,
    /// Update rejected, object deleted and created again.
    Recreated,
    Deleted,
    InSync,
    /// Desired absent and nothing there.
    Absent,
}

#[derive(Clone)]
pub struct ResourceReconciler {
    store: SharedStore,
    calculator: PatchCalculator,
    deadline: Duration,
}

impl ResourceReconciler {
    pub fn new(store: SharedStore, calculator: PatchCalculator, deadline: Duration) -> Self {
        Self { store, calculator, deadline }
    }

    pub fn store(&self) -> &SharedStore { &self.store }

    /// Run one store call under the configured deadline.
    pub async fn bounded<T>(&self, call: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        tokio::time::timeout(self.deadline, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.deadline)))
    }

    pub async fn reconcile<K: ManagedResource>(&self, desired: &K, state: DesiredState) -> Result<ResourceOutcome, ReconcileError> {
        let gvk = desired
            .gvk()
            .ok_or_else(|| ReconcileError::InvalidSpec("resource has no apiVersion/kind".into()))?;
        let kind = gvk.kind.clone();
        let key = ObjectKey::from_meta(desired.meta()).ok_or_else(|| ReconcileError::MissingName { kind: kind.clone() })?;

        let current = match self.bounded(self.store.get(&gvk, &key)).await {
            Ok(obj) => Some(obj),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(ReconcileError::store("get", &kind, &key, e)),
        };

        let outcome = match (current, state) {
            (None, DesiredState::Absent) => {
                debug!(%kind, %key, "resource already absent");
                ResourceOutcome::Absent
            }
            (None, DesiredState::Present) => {
                self.create(&gvk, &key, desired, true).await?;
                info!(%kind, %key, "resource created");
                ResourceOutcome::Created
            }
            (Some(_), DesiredState::Absent) => self.delete(&gvk, &key).await?,
            (Some(live), DesiredState::Present) => {
                let current: K = from_dynamic(live).map_err(ReconcileError::encode(&kind))?;
                self.converge(&gvk, &key, &current, desired).await?
            }
        };
        counter!(outcome_metric(outcome), 1u64, "kind" => kind);
        Ok(outcome)
    }

    async fn converge<K: ManagedResource>(&self, gvk: &GroupVersionKind, key: &ObjectKey, current: &K, desired: &K) -> Result<ResourceOutcome, ReconcileError> {
        let kind = gvk.kind.as_str();
        match self.calculator.calculate(current, desired, desired.diff_strategy()) {
            Ok(result) if result.is_empty() => {
                debug!(%kind, %key, "resource is in sync");
                return Ok(ResourceOutcome::InSync);
            }
            Ok(result) => log_patch(kind, key, &result),
            // Treated as differing; the update below is the safe direction.
            Err(e) => warn!(%kind, %key, error = %e, "could not match objects"),
        }

        let mut update = desired.clone();
        self.annotate(&mut update, kind, key);
        let version = current
            .meta()
            .resource_version
            .clone()
            .filter(|rv| !rv.is_empty())
            .ok_or_else(|| ReconcileError::MissingVersion { kind: kind.to_string(), key: key.clone() })?;
        update.meta_mut().resource_version = Some(version);
        update.preserve_immutable(current);

        let obj = to_dynamic(&update).map_err(ReconcileError::encode(kind))?;
        match self.bounded(self.store.update(gvk, &obj)).await {
            Ok(_) => {
                info!(%kind, %key, "resource updated");
                Ok(ResourceOutcome::Updated)
            }
            Err(e) if e.needs_recreate() => {
                warn!(%kind, %key, error = %e, "update rejected, recreating resource");
                match self.bounded(self.store.delete(gvk, key)).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(ReconcileError::store("delete", kind, key, e)),
                }
                self.create(gvk, key, desired, false).await?;
                info!(%kind, %key, "resource recreated");
                Ok(ResourceOutcome::Recreated)
            }
            Err(e) => Err(ReconcileError::store("update", kind, key, e)),
        }
    }

    /// Create `desired` without a version token; `annotate` records the last-applied configuration first.
    async fn create<K: ManagedResource>(&self, gvk: &GroupVersionKind, key: &ObjectKey, desired: &K, annotate: bool) -> Result<(), ReconcileError> {
        let kind = gvk.kind.as_str();
        let mut obj = desired.clone();
        obj.meta_mut().resource_version = None;
        if annotate {
            self.annotate(&mut obj, kind, key);
        }
        let obj = to_dynamic(&obj).map_err(ReconcileError::encode(kind))?;
        self.bounded(self.store.create(gvk, &obj))
            .await
            .map_err(|e| ReconcileError::store("create", kind, key, e))?;
        Ok(())
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<ResourceOutcome, ReconcileError> {
        let kind = gvk.kind.as_str();
        match self.bounded(self.store.delete(gvk, key)).await {
            Ok(()) => {
                info!(%kind, %key, "resource deleted");
                Ok(ResourceOutcome::Deleted)
            }
            Err(e) if e.is_not_found() => Ok(ResourceOutcome::Absent),
            Err(e) => Err(ReconcileError::store("delete", kind, key, e)),
        }
    }

    fn annotate<K: ManagedResource>(&self, obj: &mut K, kind: &str, key: &ObjectKey) {
        if let Err(e) = self.calculator.annotator().set_last_applied(obj) {
            warn!(%kind, %key, error = %e, "failed to set last applied annotation");
        }
    }
}

fn outcome_metric(outcome: ResourceOutcome) -> &'static str {
    match outcome {
        ResourceOutcome::Created => "resource_created_total",
        ResourceOutcome::Updated => "resource_updated_total",
        ResourceOutcome::Recreated => "resource_recreated_total",
        ResourceOutcome::Deleted => "resource_deleted_total",
        ResourceOutcome::InSync | ResourceOutcome::Absent => "resource_in_sync_total",
    }
}

fn log_patch(kind: &str, key: &ObjectKey, result: &PatchResult) {
    let parsed = (serde_json::from_slice::<Json>(&result.modified), serde_json::from_slice::<Json>(&result.original));
    if let (Ok(modified), Ok(original)) = parsed {
        let s = diff_summary(&modified, &original);
        debug!(%kind, %key, adds = s.adds, updates = s.updates, removes = s.removes, patch = %result, "resource differs");
    } else {
        debug!(%kind, %key, patch = %result, "resource differs");
    }
}
