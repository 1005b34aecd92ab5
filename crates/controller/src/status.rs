//! Status of an `AdvDeployment` aggregated from its workloads.

use k8s_openapi::api::apps::v1::Deployment;
use keel_core::crd::{AdvDeployment, AdvDeploymentStatus, DeployState, PodSetStatus};
use keel_reconcile::ReconcileError;

fn pod_set(d: &Deployment) -> Option<PodSetStatus> {
    let name = d.metadata.name.clone()?;
    let st = d.status.clone().unwrap_or_default();
    Some(PodSetStatus {
        name,
        observed_generation: st.observed_generation.unwrap_or_default(),
        replicas: st.replicas.unwrap_or_default(),
        updated_replicas: st.updated_replicas.unwrap_or_default(),
        ready_replicas: st.ready_replicas.unwrap_or_default(),
        available_replicas: st.available_replicas.unwrap_or_default(),
        unavailable_replicas: st.unavailable_replicas.unwrap_or_default(),
    })
}

/// Status after a cycle: `ReconcileFailed` with the error, otherwise `Available` once every
/// declared replica is ready and `Reconciling` until then.
pub fn aggregate(owner: &AdvDeployment, workloads: &[Deployment], error: Option<&ReconcileError>) -> AdvDeploymentStatus {
    let previous = owner.status.clone().unwrap_or_default();
    let pod_sets = workloads.iter().filter_map(pod_set).map(|p| (p.name.clone(), p)).collect::<std::collections::BTreeMap<_, _>>();
    let replicas: i32 = pod_sets.values().map(|p| p.replicas).sum();
    let ready_replicas: i32 = pod_sets.values().map(|p| p.ready_replicas).sum();

    let (phase, message) = match error {
        Some(e) => (DeployState::ReconcileFailed, e.to_string()),
        None if ready_replicas >= owner.spec.desired_replicas() => (DeployState::Available, String::new()),
        None => (DeployState::Reconciling, String::new()),
    };
    AdvDeploymentStatus {
        phase: Some(phase),
        message,
        replicas,
        ready_replicas,
        pod_sets,
        ..previous
    }
}
