//! Endpoint `Service` of an `AdvDeployment`.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use keel_core::crd::AdvDeployment;
use keel_core::{gvk_of, DesiredState, EngineConfig};
use kube::core::ObjectMeta;
use kube::ResourceExt;
use tracing::info;

use crate::component::ComponentReconciler;
use crate::labels::{app_selector, owner_references, service_labels};
use crate::{ReconcileError, ResourceReconciler};

pub fn desired_service(owner: &AdvDeployment, cfg: &EngineConfig) -> Service {
    let name = match owner.spec.service_name.as_str() {
        "" => owner.name_any(),
        n => n.to_string(),
    };
    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: owner.namespace(),
            labels: Some(service_labels(owner, cfg)),
            owner_references: owner_references(owner),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                target_port: Some(IntOrString::Int(cfg.service_port)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            selector: Some(app_selector(owner, cfg)),
            ..Default::default()
        }),
        status: None,
    }
}

pub struct ServiceReconciler<'a> {
    owner: &'a AdvDeployment,
    resources: &'a ResourceReconciler,
    cfg: &'a EngineConfig,
}

impl<'a> ServiceReconciler<'a> {
    pub fn new(owner: &'a AdvDeployment, resources: &'a ResourceReconciler, cfg: &'a EngineConfig) -> Self {
        Self { owner, resources, cfg }
    }
}

#[async_trait::async_trait]
impl<'a> ComponentReconciler for ServiceReconciler<'a> {
    fn name(&self) -> &'static str { "svc" }

    async fn reconcile(&self) -> Result<(), ReconcileError> {
        let svc = desired_service(self.owner, self.cfg);
        let existing = crate::component::list_owned(self.resources, &gvk_of::<Service>(), self.owner, self.cfg).await?;
        if existing.is_empty() {
            info!(component = self.name(), name = %self.owner.name_any(), "maybe first deploy");
        }
        self.resources.reconcile(&svc, DesiredState::Present).await?;
        info!(component = self.name(), "reconciled");
        Ok(())
    }
}
