#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, Service};
use keel_controller::{spawn_runner, Controller};
use keel_core::crd::{AdvDeployment, AdvDeploymentSpec, AdvDeploymentStatus, CellReplicas, DeployState};
use keel_core::{gvk_of, EngineConfig, ObjectKey, ObjectStore, SharedStore};
use keel_reconcile::kind::{from_dynamic, to_dynamic};
use keel_store::{MemStore, Verb};
use serde_json::json;

fn adv(cells: &[(&str, i32)]) -> AdvDeployment {
    let mut spec = AdvDeploymentSpec { service_name: "web-svc".into(), ..Default::default() };
    spec.template.spec = Some(PodSpec {
        containers: vec![Container { name: "app".into(), image: Some("nginx:1".into()), ..Default::default() }],
        ..Default::default()
    });
    spec.strategy.cell_replicas = cells.iter().map(|(c, r)| CellReplicas { cell_name: c.to_string(), replicas: *r }).collect();
    let mut adv = AdvDeployment::new("web", spec);
    adv.metadata.namespace = Some("default".into());
    adv
}

fn key() -> ObjectKey { ObjectKey::namespaced("default", "web") }

fn rig(owner: Option<AdvDeployment>) -> (Arc<MemStore>, Controller) {
    rig_with(owner, EngineConfig::default())
}

fn rig_with(owner: Option<AdvDeployment>, cfg: EngineConfig) -> (Arc<MemStore>, Controller) {
    let store = Arc::new(MemStore::new());
    if let Some(owner) = owner {
        store.seed(&gvk_of::<AdvDeployment>(), to_dynamic(&owner).unwrap());
    }
    let shared: SharedStore = store.clone();
    (store, Controller::new(shared, Arc::new(cfg)))
}

fn status_of(store: &MemStore) -> AdvDeploymentStatus {
    let obj = store.object(&gvk_of::<AdvDeployment>(), &key()).unwrap();
    from_dynamic::<AdvDeployment>(obj).unwrap().status.unwrap_or_default()
}

#[tokio::test]
async fn missing_object_is_not_an_error() {
    let (store, controller) = rig(None);
    let outcome = controller.reconcile(&key()).await;
    assert!(outcome.is_ok());
    assert_eq!(outcome.requeue_after, None);
    assert_eq!(store.verbs(), vec![Verb::Get]);
}

#[tokio::test]
async fn cycle_creates_children_and_records_status_once() {
    let (store, controller) = rig(Some(adv(&[("rz01a", 2), ("rz02b", 1)])));
    let outcome = controller.reconcile(&key()).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(20)));
    assert!(store.object(&gvk_of::<Service>(), &ObjectKey::namespaced("default", "web-svc")).is_some());
    assert!(store.object(&gvk_of::<Deployment>(), &ObjectKey::namespaced("default", "web-rz02b")).is_some());

    let st = status_of(&store);
    assert_eq!(st.phase, Some(DeployState::Reconciling));
    assert_eq!(st.pod_sets.len(), 2);
    assert!(store.verbs().contains(&Verb::UpdateStatus));

    store.clear_calls();
    let outcome = controller.reconcile(&key()).await;
    assert!(outcome.is_ok());
    let writes: Vec<Verb> = store.verbs().into_iter().filter(|v| !matches!(v, Verb::Get | Verb::List)).collect();
    assert!(writes.is_empty(), "steady state must not write: {:?}", writes);
}

#[tokio::test]
async fn ready_workloads_make_object_available() {
    let (store, controller) = rig(Some(adv(&[("rz01a", 2)])));
    controller.reconcile(&key()).await;

    let gvk = gvk_of::<Deployment>();
    let mut deploy = store.object(&gvk, &ObjectKey::namespaced("default", "web-rz01a")).unwrap();
    deploy.data["status"] = json!({ "replicas": 2, "readyReplicas": 2, "availableReplicas": 2 });
    store.update_status(&gvk, &deploy).await.unwrap();

    controller.reconcile(&key()).await;
    let st = status_of(&store);
    assert_eq!(st.phase, Some(DeployState::Available));
    assert_eq!(st.ready_replicas, 2);
}

#[tokio::test]
async fn failure_is_reported_in_outcome_and_status() {
    let (store, controller) = rig(Some(adv(&[("a-b-c", 1)])));
    let outcome = controller.reconcile(&key()).await;
    let err = outcome.error.expect("invalid cell key fails the cycle");
    assert_eq!(err.component(), Some("deploy"));
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(20)));

    let st = status_of(&store);
    assert_eq!(st.phase, Some(DeployState::ReconcileFailed));
    assert!(st.message.contains("a-b-c"), "{}", st.message);
}

#[tokio::test]
async fn runner_drains_in_flight_work_on_close() {
    let (store, controller) = rig(Some(adv(&[("rz01a", 1)])));
    let (tx, handle) = spawn_runner(Arc::new(controller), 2, 16);
    tx.send(key()).await.unwrap();
    tx.send(key()).await.unwrap();
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(store.object(&gvk_of::<Deployment>(), &ObjectKey::namespaced("default", "web-rz01a")).is_some());
}

#[tokio::test]
async fn deleted_object_is_not_polled_again() {
    let cfg = EngineConfig { requeue_after: Duration::from_millis(20), ..EngineConfig::default() };
    let (store, controller) = rig_with(None, cfg);
    let (tx, handle) = spawn_runner(Arc::new(controller), 2, 16);
    tx.send(key()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.verbs(), vec![Verb::Get], "a missing object is looked up once");

    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn live_object_keeps_being_resynced() {
    let cfg = EngineConfig { requeue_after: Duration::from_millis(20), ..EngineConfig::default() };
    let (store, controller) = rig_with(Some(adv(&[("rz01a", 1)])), cfg);
    let (tx, handle) = spawn_runner(Arc::new(controller), 2, 16);
    tx.send(key()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let gets = store.verbs().into_iter().filter(|v| *v == Verb::Get).count();
    assert!(gets > 3, "expected periodic resync, saw {} gets", gets);

    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}
