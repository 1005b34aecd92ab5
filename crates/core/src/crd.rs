//! `AdvDeployment`: the top-level declared object.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMapKeySelector, PersistentVolumeClaim, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

pub const WORKLOAD_DEPLOYMENT: &str = "Deployment";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "workload.dmall.com",
    version = "v1beta1",
    kind = "AdvDeployment",
    namespaced,
    status = "AdvDeploymentStatus",
    shortname = "advd",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AdvDeploymentSpec {
    /// Deployment (default), StatefulSet or InPlaceSet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(default)]
    pub strategy: UpdateStrategy,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub install_multi_clusters: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ref: Option<ClusterRef>,
}

impl AdvDeploymentSpec {
    pub fn workload_type(&self) -> &str {
        self.workload_type.as_deref().filter(|t| !t.is_empty()).unwrap_or(WORKLOAD_DEPLOYMENT)
    }

    /// Sum of replicas over all cells.
    pub fn desired_replicas(&self) -> i32 {
        self.strategy.cell_replicas.iter().map(|c| c.replicas).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodUpdateStrategyType {
    #[serde(rename = "ReCreate")]
    Recreate,
    InPlaceIfPossible,
    InPlaceOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_update_policy: Option<PodUpdateStrategyType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    /// Beta, Batch, BlueGreen, Cell
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upgrade_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rz_num: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful_set_strategy: Option<StatefulSetStrategy>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub need_waiting_for_confirm: bool,
    #[serde(default)]
    pub min_ready_seconds: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cell_replicas: Vec<CellReplicas>,
    /// Extra labels merged onto every managed resource.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellReplicas {
    /// `ldc` or `ldc-group`.
    pub cell_name: String,
    #[serde(default)]
    pub replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAllocator {
    pub name: String,
    pub alloc_factor: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    #[serde(rename = "configMapKeyRef", default, skip_serializing_if = "Option::is_none")]
    pub cluster_info_ref: Option<ConfigMapKeySelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_allocators: Vec<ClusterAllocator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployState {
    Created,
    ReconcileFailed,
    Reconciling,
    Available,
    Unmanaged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSetStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub unavailable_replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvDeploymentCondition {
    /// Available, Progressing or ReplicaFailure.
    #[serde(rename = "type")]
    pub type_: String,
    /// True, False or Unknown.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvDeploymentStatus {
    #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DeployState>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_sets: BTreeMap<String, PodSetStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<AdvDeploymentCondition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cell_strategy_from_json() {
        let raw = serde_json::json!({
            "apiVersion": "workload.dmall.com/v1beta1",
            "kind": "AdvDeployment",
            "metadata": { "name": "web", "namespace": "default" },
            "spec": {
                "serviceName": "web-svc",
                "template": { "spec": { "containers": [ { "name": "app", "image": "nginx" } ] } },
                "strategy": {
                    "cellReplicas": [ { "cellName": "rz01", "replicas": 2 }, { "cellName": "rz02-blue", "replicas": 3 } ],
                    "meta": { "team": "search" }
                }
            }
        });
        let adv: AdvDeployment = serde_json::from_value(raw).unwrap();
        assert_eq!(adv.spec.service_name, "web-svc");
        assert_eq!(adv.spec.strategy.cell_replicas.len(), 2);
        assert_eq!(adv.spec.desired_replicas(), 5);
        assert_eq!(adv.spec.workload_type(), WORKLOAD_DEPLOYMENT);
        assert_eq!(adv.spec.strategy.meta.get("team").map(String::as_str), Some("search"));
    }

    #[test]
    fn status_phase_serializes_under_status_key() {
        let st = AdvDeploymentStatus { phase: Some(DeployState::ReconcileFailed), message: "boom".into(), ..Default::default() };
        let v = serde_json::to_value(&st).unwrap();
        assert_eq!(v["status"], "ReconcileFailed");
        assert_eq!(v["message"], "boom");
    }
}
