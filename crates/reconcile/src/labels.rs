//! Labels, selectors and scheduling defaults derived from an `AdvDeployment`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, PodAffinityTerm, PodAntiAffinity, WeightedPodAffinityTerm};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use keel_core::crd::AdvDeployment;
use keel_core::EngineConfig;
use kube::{Resource, ResourceExt};

use crate::ReconcileError;

pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

pub type Labels = BTreeMap<String, String>;

/// `overlay` wins on conflicting keys.
pub fn merge_labels(base: Labels, overlay: &Labels) -> Labels {
    let mut merged = base;
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Split a cell name `ldc[-group]` into its ldc and (possibly empty) group.
pub fn split_cell_key(cell: &str) -> Result<(&str, &str), ReconcileError> {
    let mut parts = cell.split('-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ldc), None, _) => Ok((ldc, "")),
        (Some(ldc), Some(group), None) => Ok((ldc, group)),
        _ => Err(ReconcileError::InvalidSpec(format!("unexpected cell key format: {:?}", cell))),
    }
}

/// `{app: <name>}`, the selector that ties pods and owned resources to their object.
pub fn app_selector(owner: &AdvDeployment, cfg: &EngineConfig) -> Labels {
    BTreeMap::from([(cfg.labels.app.clone(), owner.name_any())])
}

pub fn domain(owner: &AdvDeployment, cfg: &EngineConfig) -> String {
    match owner.spec.domain.as_deref().filter(|d| !d.is_empty()) {
        Some(d) => d.to_string(),
        None => format!("{}.{}", owner.name_any(), cfg.domain_suffix),
    }
}

/// Object labels for the Service and every workload.
pub fn service_labels(owner: &AdvDeployment, cfg: &EngineConfig) -> Labels {
    let mut labels = app_selector(owner, cfg);
    labels.insert(cfg.labels.domain.clone(), domain(owner, cfg));
    merge_labels(labels, &owner.spec.strategy.meta)
}

/// Selector and pod labels of the workload serving `cell`.
pub fn workload_labels(owner: &AdvDeployment, cell: &str, cfg: &EngineConfig) -> Result<Labels, ReconcileError> {
    let (ldc, group) = split_cell_key(cell)?;
    let name = owner.name_any();
    let mut labels = BTreeMap::new();
    labels.insert(cfg.labels.app.clone(), name.clone());
    labels.insert(cfg.labels.release.clone(), format!("{}-{}", name, cell));
    labels.insert(cfg.labels.ldc.clone(), ldc.to_string());
    labels.insert(cfg.labels.group.clone(), group.to_string());
    Ok(merge_labels(labels, &owner.spec.strategy.meta))
}

/// Spread pods of one object across nodes when the template does not say otherwise.
pub fn default_affinity(owner: &AdvDeployment, cfg: &EngineConfig) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![WeightedPodAffinityTerm {
                weight: 1,
                pod_affinity_term: PodAffinityTerm {
                    label_selector: Some(LabelSelector { match_labels: Some(app_selector(owner, cfg)), ..Default::default() }),
                    namespaces: owner.namespace().map(|ns| vec![ns]),
                    topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                    ..Default::default()
                },
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Controller owner reference, absent until the object has a server-assigned uid.
pub fn owner_references(owner: &AdvDeployment) -> Option<Vec<OwnerReference>> {
    owner.controller_owner_ref(&()).map(|r| vec![r])
}

/// Whether `refs` name `owner` as controller. Objects without a uid own nothing yet.
pub fn controlled_by(refs: Option<&Vec<OwnerReference>>, owner: &AdvDeployment) -> bool {
    let Some(uid) = owner.meta().uid.as_deref() else { return false };
    refs.into_iter().flatten().any(|r| r.uid == uid && r.controller == Some(true))
}
