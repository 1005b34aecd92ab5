#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use keel_core::{gvk_of, DesiredState, ObjectKey, ObjectStore, SharedStore, StoreError};
use keel_patch::annotation::DEFAULT_KEY;
use keel_patch::{delete_nulls, PatchCalculator};
use keel_reconcile::kind::to_dynamic;
use keel_reconcile::{ReconcileError, ResourceOutcome, ResourceReconciler};
use keel_store::{MemStore, Verb};
use kube::core::{DynamicObject, GroupVersionKind, ObjectMeta};

fn rig() -> (Arc<MemStore>, ResourceReconciler) {
    let store = Arc::new(MemStore::new());
    let shared: SharedStore = store.clone();
    (store, ResourceReconciler::new(shared, PatchCalculator::default(), Duration::from_secs(5)))
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "web".to_string())])
}

fn service(target: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some("web".into()),
            namespace: Some("default".into()),
            labels: Some(app_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                target_port: Some(IntOrString::Int(target)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            selector: Some(app_labels()),
            ..Default::default()
        }),
        status: None,
    }
}

fn key() -> ObjectKey { ObjectKey::namespaced("default", "web") }

fn svc_gvk() -> GroupVersionKind { gvk_of::<Service>() }

fn stored(store: &MemStore) -> DynamicObject {
    store.object(&svc_gvk(), &key()).expect("service stored")
}

fn annotation(obj: &DynamicObject) -> Option<String> {
    obj.metadata.annotations.as_ref().and_then(|a| a.get(DEFAULT_KEY)).cloned()
}

#[tokio::test]
async fn create_records_desired_as_last_applied() {
    let (store, rec) = rig();
    let desired = service(8080);
    assert_eq!(rec.reconcile(&desired, DesiredState::Present).await.unwrap(), ResourceOutcome::Created);
    assert_eq!(store.verbs(), vec![Verb::Get, Verb::Create]);

    let stored = stored(&store);
    let recorded: serde_json::Value = serde_json::from_str(&annotation(&stored).unwrap()).unwrap();
    assert_eq!(recorded, delete_nulls(serde_json::to_value(&desired).unwrap()));
}

#[tokio::test]
async fn second_reconcile_is_a_no_op() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    store.clear_calls();
    assert_eq!(rec.reconcile(&service(8080), DesiredState::Present).await.unwrap(), ResourceOutcome::InSync);
    assert_eq!(store.verbs(), vec![Verb::Get]);
}

#[tokio::test]
async fn update_carries_live_version_and_cluster_ip() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    let before = stored(&store);
    store.clear_calls();

    assert_eq!(rec.reconcile(&service(9090), DesiredState::Present).await.unwrap(), ResourceOutcome::Updated);
    let calls = store.calls();
    assert_eq!(calls.iter().map(|c| c.verb).collect::<Vec<_>>(), vec![Verb::Get, Verb::Update]);
    assert_eq!(calls[1].resource_version, before.metadata.resource_version);

    let after = stored(&store);
    assert_eq!(after.data["spec"]["ports"][0]["targetPort"], 9090);
    assert_eq!(after.data["spec"]["clusterIP"], before.data["spec"]["clusterIP"]);
    assert!(annotation(&after).unwrap().contains("9090"));
}

#[tokio::test]
async fn rejected_update_deletes_then_creates_pristine_copy() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    store.clear_calls();
    store.fail_next(Verb::Update, StoreError::Conflict("stale resourceVersion".into()));

    assert_eq!(rec.reconcile(&service(9090), DesiredState::Present).await.unwrap(), ResourceOutcome::Recreated);
    assert_eq!(store.verbs(), vec![Verb::Get, Verb::Update, Verb::Delete, Verb::Create]);
    let recreated = stored(&store);
    assert!(annotation(&recreated).is_none(), "recreate uses the copy taken before annotating");
    assert_eq!(recreated.data["spec"]["ports"][0]["targetPort"], 9090);

    // The recreated object already matches, so no further write follows.
    store.clear_calls();
    assert_eq!(rec.reconcile(&service(9090), DesiredState::Present).await.unwrap(), ResourceOutcome::InSync);
    assert_eq!(store.verbs(), vec![Verb::Get]);
}

#[tokio::test]
async fn invalid_update_also_recreates() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    store.fail_next(Verb::Update, StoreError::Invalid("spec.clusterIP: field is immutable".into()));
    assert_eq!(rec.reconcile(&service(7070), DesiredState::Present).await.unwrap(), ResourceOutcome::Recreated);
}

#[tokio::test]
async fn transient_update_failure_is_returned_without_fallback() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    store.clear_calls();
    store.fail_next(Verb::Update, StoreError::Unavailable("connection reset".into()));

    let err = rec.reconcile(&service(9090), DesiredState::Present).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Store { action: "update", .. }), "{}", err);
    assert_eq!(store.verbs(), vec![Verb::Get, Verb::Update]);
}

#[tokio::test]
async fn absent_deletes_existing_and_ignores_missing() {
    let (store, rec) = rig();
    assert_eq!(rec.reconcile(&service(8080), DesiredState::Absent).await.unwrap(), ResourceOutcome::Absent);
    assert_eq!(store.verbs(), vec![Verb::Get]);

    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    assert_eq!(rec.reconcile(&service(8080), DesiredState::Absent).await.unwrap(), ResourceOutcome::Deleted);
    assert!(store.is_empty());
}

#[tokio::test]
async fn unannotated_object_is_adopted_then_converges() {
    let (store, rec) = rig();
    let mut bare = service(8080);
    bare.metadata.labels = None;
    store.seed(&svc_gvk(), to_dynamic(&bare).unwrap());

    assert_eq!(rec.reconcile(&service(8080), DesiredState::Present).await.unwrap(), ResourceOutcome::Updated);
    assert_eq!(stored(&store).metadata.labels, Some(app_labels()));
    assert!(annotation(&stored(&store)).is_some());

    store.clear_calls();
    assert_eq!(rec.reconcile(&service(8080), DesiredState::Present).await.unwrap(), ResourceOutcome::InSync);
    assert_eq!(store.verbs(), vec![Verb::Get]);
}

#[tokio::test]
async fn missing_name_aborts_before_any_call() {
    let (store, rec) = rig();
    let mut nameless = service(8080);
    nameless.metadata.name = None;
    let err = rec.reconcile(&nameless, DesiredState::Present).await.unwrap_err();
    assert!(matches!(err, ReconcileError::MissingName { .. }));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn unreadable_last_applied_still_updates() {
    let (store, rec) = rig();
    let mut live = service(8080);
    live.metadata.annotations = Some(BTreeMap::from([(DEFAULT_KEY.to_string(), "{not json".to_string())]));
    store.seed(&svc_gvk(), to_dynamic(&live).unwrap());

    assert_eq!(rec.reconcile(&service(9090), DesiredState::Present).await.unwrap(), ResourceOutcome::Updated);
    assert_eq!(store.verbs(), vec![Verb::Get, Verb::Update]);
    let recorded = annotation(&stored(&store)).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&recorded).is_ok(), "annotation rewritten: {}", recorded);
}

#[tokio::test]
async fn failed_delete_is_returned() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    store.fail_next(Verb::Delete, StoreError::Unavailable("connection reset".into()));

    let err = rec.reconcile(&service(8080), DesiredState::Absent).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Store { action: "delete", .. }), "{}", err);
    assert!(store.object(&svc_gvk(), &key()).is_some());
}

#[tokio::test]
async fn recreate_stops_at_failed_delete() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    store.clear_calls();
    store.fail_next(Verb::Update, StoreError::Conflict("stale resourceVersion".into()));
    store.fail_next(Verb::Delete, StoreError::Unavailable("connection reset".into()));

    let err = rec.reconcile(&service(9090), DesiredState::Present).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Store { action: "delete", .. }), "{}", err);
    assert_eq!(store.verbs(), vec![Verb::Get, Verb::Update, Verb::Delete]);
    assert_eq!(stored(&store).data["spec"]["ports"][0]["targetPort"], 8080);
}

#[tokio::test]
async fn recreate_reports_failed_create() {
    let (store, rec) = rig();
    rec.reconcile(&service(8080), DesiredState::Present).await.unwrap();
    store.clear_calls();
    store.fail_next(Verb::Update, StoreError::Invalid("spec.clusterIP: field is immutable".into()));
    store.fail_next(Verb::Create, StoreError::Unavailable("connection reset".into()));

    let err = rec.reconcile(&service(9090), DesiredState::Present).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Store { action: "create", .. }), "{}", err);
    assert_eq!(store.verbs(), vec![Verb::Get, Verb::Update, Verb::Delete, Verb::Create]);
    assert!(store.is_empty(), "deleted object stays gone until the next cycle");
}

/// Store that serves live objects without a resource version.
struct Versionless(Arc<MemStore>);

#[async_trait::async_trait]
impl ObjectStore for Versionless {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let mut obj = self.0.get(gvk, key).await?;
        obj.metadata.resource_version = None;
        Ok(obj)
    }
    async fn list(&self, gvk: &GroupVersionKind, ns: Option<&str>, labels: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>, StoreError> {
        self.0.list(gvk, ns, labels).await
    }
    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.0.create(gvk, obj).await
    }
    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.0.update(gvk, obj).await
    }
    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.0.update_status(gvk, obj).await
    }
    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), StoreError> {
        self.0.delete(gvk, key).await
    }
}

#[tokio::test]
async fn live_object_without_version_is_not_updated() {
    let store = Arc::new(MemStore::new());
    store.seed(&svc_gvk(), to_dynamic(&service(8080)).unwrap());
    let rec = ResourceReconciler::new(Arc::new(Versionless(store.clone())), PatchCalculator::default(), Duration::from_secs(5));

    let err = rec.reconcile(&service(9090), DesiredState::Present).await.unwrap_err();
    assert!(matches!(err, ReconcileError::MissingVersion { .. }), "{}", err);
    assert_eq!(store.verbs(), vec![Verb::Get]);
}

/// Store whose reads never complete.
struct Hanging;

#[async_trait::async_trait]
impl ObjectStore for Hanging {
    async fn get(&self, _: &GroupVersionKind, _: &ObjectKey) -> Result<DynamicObject, StoreError> {
        std::future::pending().await
    }
    async fn list(&self, _: &GroupVersionKind, _: Option<&str>, _: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>, StoreError> {
        std::future::pending().await
    }
    async fn create(&self, _: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        Ok(obj.clone())
    }
    async fn update(&self, _: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        Ok(obj.clone())
    }
    async fn update_status(&self, _: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        Ok(obj.clone())
    }
    async fn delete(&self, _: &GroupVersionKind, _: &ObjectKey) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn store_calls_are_bounded_by_deadline() {
    let rec = ResourceReconciler::new(Arc::new(Hanging), PatchCalculator::default(), Duration::from_millis(20));
    let err = rec.reconcile(&service(8080), DesiredState::Present).await.unwrap_err();
    match err {
        ReconcileError::Store { action, source, .. } => {
            assert_eq!(action, "get");
            assert_eq!(source, StoreError::Timeout(Duration::from_millis(20)));
        }
        other => panic!("unexpected error: {}", other),
    }
}
