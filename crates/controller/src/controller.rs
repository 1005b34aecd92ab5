//! One reconcile cycle of a top-level `AdvDeployment`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::Deployment;
use keel_core::crd::{AdvDeployment, AdvDeploymentStatus};
use keel_core::{gvk_of, EngineConfig, ObjectKey, SharedStore};
use keel_patch::{Annotator, PatchCalculator};
use keel_reconcile::component::list_owned;
use keel_reconcile::kind::{from_dynamic, to_dynamic};
use keel_reconcile::labels::controlled_by;
use keel_reconcile::{run_components, ReconcileError, ResourceReconciler, ServiceReconciler, WorkloadReconciler};
use metrics::{counter, histogram};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::status;

/// What the caller should do after a cycle.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// `None` once the object is gone; its key is not polled again until a new event arrives.
    pub requeue_after: Option<Duration>,
    pub error: Option<ReconcileError>,
}

impl ReconcileOutcome {
    pub fn is_ok(&self) -> bool { self.error.is_none() }
}

enum Presence {
    Live,
    Gone,
}

pub struct Controller {
    store: SharedStore,
    cfg: Arc<EngineConfig>,
    resources: ResourceReconciler,
}

impl Controller {
    pub fn new(store: SharedStore, cfg: Arc<EngineConfig>) -> Self {
        let calculator = PatchCalculator::new(Annotator::new(cfg.annotation_key.clone()));
        let resources = ResourceReconciler::new(store.clone(), calculator, cfg.store_timeout);
        Self { store, cfg, resources }
    }

    /// Load the object, run the service and workload components in order, record status.
    /// An existing object, failed or not, asks for the fixed resync interval; a deleted
    /// object is not an error and asks for no requeue.
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        let id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let result = self.cycle(key).instrument(info_span!("reconcile", %key, %id)).await;

        counter!("reconcile_cycles_total", 1u64);
        histogram!("reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(Presence::Gone) => ReconcileOutcome { requeue_after: None, error: None },
            Ok(Presence::Live) => ReconcileOutcome { requeue_after: Some(self.cfg.requeue_after), error: None },
            Err(e) => {
                counter!("reconcile_errors_total", 1u64);
                ReconcileOutcome { requeue_after: Some(self.cfg.requeue_after), error: Some(e) }
            }
        }
    }

    async fn cycle(&self, key: &ObjectKey) -> Result<Presence, ReconcileError> {
        let gvk = gvk_of::<AdvDeployment>();
        let live = match self.resources.bounded(self.store.get(&gvk, key)).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                info!("object not found, probably deleted");
                return Ok(Presence::Gone);
            }
            Err(e) => return Err(ReconcileError::Store { action: "get", kind: gvk.kind, key: key.clone(), source: e }),
        };
        let owner: AdvDeployment = from_dynamic(live).map_err(|source| ReconcileError::Encode { kind: gvk.kind.clone(), source })?;

        let cfg = self.cfg.as_ref();
        let svc = ServiceReconciler::new(&owner, &self.resources, cfg);
        let deploy = WorkloadReconciler::new(&owner, &self.resources, cfg);
        let result = run_components(&[&svc, &deploy]).await;
        match &result {
            Ok(()) => info!("reconciled"),
            Err(e) => warn!(error = %e, "reconcile failed"),
        }

        self.write_status(&owner, result.as_ref().err()).await;
        result.map(|()| Presence::Live)
    }

    /// Failures are logged; status never fails a cycle.
    async fn write_status(&self, owner: &AdvDeployment, error: Option<&ReconcileError>) {
        let workloads = match list_owned(&self.resources, &gvk_of::<Deployment>(), owner, &self.cfg).await {
            Ok(list) => list
                .into_iter()
                .filter(|o| controlled_by(o.metadata.owner_references.as_ref(), owner))
                .filter_map(|o| from_dynamic::<Deployment>(o).ok())
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "skipping status update");
                return;
            }
        };
        let next: AdvDeploymentStatus = status::aggregate(owner, &workloads, error);
        if owner.status.as_ref() == Some(&next) {
            debug!("status unchanged");
            return;
        }

        let mut updated = owner.clone();
        updated.status = Some(next);
        let obj = match to_dynamic(&updated) {
            Ok(obj) => obj,
            Err(e) => {
                warn!(error = %e, "failed to encode status");
                return;
            }
        };
        match self.resources.bounded(self.store.update_status(&gvk_of::<AdvDeployment>(), &obj)).await {
            Ok(_) => debug!(phase = ?updated.status.as_ref().and_then(|s| s.phase), "status updated"),
            Err(e) => warn!(error = %e, "failed to update status"),
        }
    }
}
