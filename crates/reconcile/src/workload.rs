//! Per-cell `Deployment` workloads of an `AdvDeployment`.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use keel_core::crd::{AdvDeployment, CellReplicas, WORKLOAD_DEPLOYMENT};
use keel_core::{gvk_of, DesiredState, EngineConfig};
use kube::core::ObjectMeta;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::component::{list_owned, ComponentReconciler};
use crate::labels::{controlled_by, default_affinity, owner_references, service_labels, workload_labels};
use crate::{ReconcileError, ResourceReconciler};

pub const RECREATE_STRATEGY: &str = "Recreate";

pub fn workload_name(owner: &AdvDeployment, cell: &str) -> String {
    format!("{}-{}", owner.name_any(), cell)
}

fn desired_deployment(owner: &AdvDeployment, cell: &CellReplicas, cfg: &EngineConfig) -> Result<Deployment, ReconcileError> {
    let labels = workload_labels(owner, &cell.cell_name, cfg)?;
    let mut pod = owner.spec.template.spec.clone().unwrap_or_default();
    if pod.affinity.is_none() {
        pod.affinity = Some(default_affinity(owner, cfg));
    }
    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(workload_name(owner, &cell.cell_name)),
            namespace: owner.namespace(),
            labels: Some(service_labels(owner, cfg)),
            owner_references: owner_references(owner),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(cell.replicas),
            strategy: Some(DeploymentStrategy { type_: Some(RECREATE_STRATEGY.into()), ..Default::default() }),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// One Deployment per cell, in cell order.
pub fn desired_workloads(owner: &AdvDeployment, cfg: &EngineConfig) -> Result<Vec<Deployment>, ReconcileError> {
    let kind = owner.spec.workload_type();
    if kind != WORKLOAD_DEPLOYMENT {
        return Err(ReconcileError::InvalidSpec(format!("unsupported workload type {:?}", kind)));
    }
    owner.spec.strategy.cell_replicas.iter().map(|cell| desired_deployment(owner, cell, cfg)).collect()
}

pub struct WorkloadReconciler<'a> {
    owner: &'a AdvDeployment,
    resources: &'a ResourceReconciler,
    cfg: &'a EngineConfig,
}

impl<'a> WorkloadReconciler<'a> {
    pub fn new(owner: &'a AdvDeployment, resources: &'a ResourceReconciler, cfg: &'a EngineConfig) -> Self {
        Self { owner, resources, cfg }
    }
}

#[async_trait::async_trait]
impl<'a> ComponentReconciler for WorkloadReconciler<'a> {
    fn name(&self) -> &'static str { "deploy" }

    async fn reconcile(&self) -> Result<(), ReconcileError> {
        let desired = desired_workloads(self.owner, self.cfg)?;
        if desired.is_empty() {
            warn!(component = self.name(), name = %self.owner.name_any(), "no cells declared, nothing to deploy");
        }
        let existing = list_owned(self.resources, &gvk_of::<Deployment>(), self.owner, self.cfg).await?;
        if existing.is_empty() {
            info!(component = self.name(), name = %self.owner.name_any(), "maybe first deploy");
        }

        for deploy in &desired {
            self.resources.reconcile(deploy, DesiredState::Present).await?;
        }

        // Cells dropped from the spec leave workloads behind; remove the ones this object controls.
        let wanted: BTreeSet<String> = desired.iter().filter_map(|d| d.metadata.name.clone()).collect();
        for stale in existing.iter().filter(|o| controlled_by(o.metadata.owner_references.as_ref(), self.owner)) {
            let Some(name) = stale.metadata.name.as_deref().filter(|n| !wanted.contains(*n)) else { continue };
            let victim = Deployment {
                metadata: ObjectMeta { name: Some(name.to_string()), namespace: stale.metadata.namespace.clone(), ..Default::default() },
                ..Default::default()
            };
            info!(component = self.name(), name, "pruning workload of removed cell");
            self.resources.reconcile(&victim, DesiredState::Absent).await?;
        }
        info!(component = self.name(), "reconciled");
        Ok(())
    }
}
