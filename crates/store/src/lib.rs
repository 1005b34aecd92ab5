//! Keel store: in-RAM object store.
//!
//! Implements the same version discipline as the API server: every write bumps a
//! global resource version, updates must carry the version they read, and status
//! is only writable through `update_status`. Services get a cluster IP on create
//! that later updates may not change. Every call lands in a journal so tests can
//! assert on what the engine actually did.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use keel_core::{gvk_key, ObjectKey, ObjectStore, StoreError};
use kube::core::{DynamicObject, GroupVersionKind};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value as Json};
use tracing::debug;

pub mod journal;

pub use journal::{Call, Verb};

type Slot = (String, ObjectKey);

#[derive(Default)]
struct State {
    objects: FxHashMap<Slot, DynamicObject>,
    revision: u64,
    next_ip: u32,
    calls: Vec<Call>,
    faults: FxHashMap<Verb, VecDeque<StoreError>>,
}

impl State {
    fn bump(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn record(&mut self, verb: Verb, gvk: &GroupVersionKind, key: Option<&ObjectKey>, rv: Option<&str>) -> Result<(), StoreError> {
        self.calls.push(Call {
            verb,
            kind: gvk.kind.clone(),
            key: key.cloned(),
            resource_version: rv.map(str::to_string),
        });
        match self.faults.get_mut(&verb).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!(%verb, kind = %gvk.kind, error = %err, "injected store fault");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// In-memory [`ObjectStore`].
#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
}

fn slot(gvk: &GroupVersionKind, key: &ObjectKey) -> Slot {
    (gvk_key(gvk), key.clone())
}

fn key_of(obj: &DynamicObject) -> Result<ObjectKey, StoreError> {
    ObjectKey::from_meta(&obj.metadata).ok_or_else(|| StoreError::Invalid("metadata.name: Required value".into()))
}

fn is_service(gvk: &GroupVersionKind) -> bool {
    gvk.group.is_empty() && gvk.kind == "Service"
}

fn cluster_ip(obj: &DynamicObject) -> Option<&str> {
    obj.data.get("spec").and_then(|s| s.get("clusterIP")).and_then(Json::as_str).filter(|ip| !ip.is_empty())
}

fn take_data(obj: &mut DynamicObject) -> Map<String, Json> {
    match std::mem::take(&mut obj.data) {
        Json::Object(map) => map,
        _ => Map::new(),
    }
}

fn without_status(data: &Json) -> Json {
    let mut d = data.clone();
    if let Some(map) = d.as_object_mut() {
        map.remove("status");
    }
    d
}

fn labels_match(obj: &DynamicObject, selector: &BTreeMap<String, String>) -> bool {
    let labels = obj.metadata.labels.as_ref();
    selector.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an object as if it already existed, assigning server fields.
    pub fn seed(&self, gvk: &GroupVersionKind, obj: DynamicObject) -> DynamicObject {
        let mut st = self.state();
        let mut obj = obj;
        obj.metadata.resource_version = Some(st.bump());
        obj.metadata.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        obj.metadata.generation.get_or_insert(1);
        match ObjectKey::from_meta(&obj.metadata) {
            Some(key) => {
                st.objects.insert(slot(gvk, &key), obj.clone());
            }
            None => debug!(kind = %gvk.kind, "seed without name ignored"),
        }
        obj
    }

    /// Current stored form of an object, bypassing the journal.
    pub fn object(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Option<DynamicObject> {
        self.state().objects.get(&slot(gvk, key)).cloned()
    }

    /// Number of stored objects across all kinds.
    pub fn len(&self) -> usize { self.state().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn calls(&self) -> Vec<Call> { self.state().calls.clone() }

    /// Verbs of the journal in order, for compact assertions.
    pub fn verbs(&self) -> Vec<Verb> { self.state().calls.iter().map(|c| c.verb).collect() }

    pub fn clear_calls(&self) { self.state().calls.clear(); }

    /// Fail the next call with `verb` with `err`. Faults queue up per verb.
    pub fn fail_next(&self, verb: Verb, err: StoreError) {
        self.state().faults.entry(verb).or_default().push_back(err);
    }

    fn check_version(stored: &DynamicObject, sent: Option<&str>, key: &ObjectKey) -> Result<(), StoreError> {
        match sent {
            None | Some("") => Err(StoreError::Invalid(format!("{}: metadata.resourceVersion must be specified for an update", key))),
            Some(rv) if stored.metadata.resource_version.as_deref() != Some(rv) => Err(StoreError::Conflict(format!(
                "{}: the object has been modified; please apply your changes to the latest version and try again",
                key
            ))),
            Some(_) => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemStore {
    async fn get(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let mut st = self.state();
        st.record(Verb::Get, gvk, Some(key), None)?;
        st.objects
            .get(&slot(gvk, key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", gvk.kind, key)))
    }

    async fn list(&self, gvk: &GroupVersionKind, namespace: Option<&str>, labels: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>, StoreError> {
        let mut st = self.state();
        st.record(Verb::List, gvk, None, None)?;
        let kind = gvk_key(gvk);
        let mut out: Vec<(&ObjectKey, &DynamicObject)> = st
            .objects
            .iter()
            .filter(|((k, key), obj)| *k == kind && (namespace.is_none() || key.namespace.as_deref() == namespace) && labels_match(obj, labels))
            .map(|((_, key), obj)| (key, obj))
            .collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        Ok(out.into_iter().map(|(_, o)| o.clone()).collect())
    }

    async fn create(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = key_of(obj)?;
        let mut st = self.state();
        st.record(Verb::Create, gvk, Some(&key), obj.metadata.resource_version.as_deref())?;
        if obj.metadata.resource_version.as_deref().is_some_and(|rv| !rv.is_empty()) {
            return Err(StoreError::Invalid(format!("{}: resourceVersion should not be set on objects to be created", key)));
        }
        let s = slot(gvk, &key);
        if st.objects.contains_key(&s) {
            return Err(StoreError::AlreadyExists(format!("{} {}", gvk.kind, key)));
        }

        let mut stored = obj.clone();
        stored.metadata.resource_version = Some(st.bump());
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.generation = Some(1);
        let mut data = take_data(&mut stored);
        data.remove("status");
        if is_service(gvk) && cluster_ip(obj).is_none() {
            st.next_ip += 1;
            let ip = format!("10.96.{}.{}", st.next_ip / 250, st.next_ip % 250 + 1);
            let spec = data.entry("spec").or_insert_with(|| Json::Object(Map::new()));
            if let Some(spec) = spec.as_object_mut() {
                spec.insert("clusterIP".into(), Json::String(ip.clone()));
                spec.insert("clusterIPs".into(), Json::Array(vec![Json::String(ip)]));
            }
        }
        stored.data = Json::Object(data);
        debug!(kind = %gvk.kind, %key, rv = ?stored.metadata.resource_version, "created");
        st.objects.insert(s, stored.clone());
        Ok(stored)
    }

    async fn update(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = key_of(obj)?;
        let mut st = self.state();
        st.record(Verb::Update, gvk, Some(&key), obj.metadata.resource_version.as_deref())?;
        let s = slot(gvk, &key);
        let Some(prev) = st.objects.get(&s) else {
            return Err(StoreError::NotFound(format!("{} {}", gvk.kind, key)));
        };
        Self::check_version(prev, obj.metadata.resource_version.as_deref(), &key)?;
        if is_service(gvk) && cluster_ip(obj) != cluster_ip(prev) {
            return Err(StoreError::Invalid(format!("{}: spec.clusterIP: field is immutable", key)));
        }

        let mut stored = obj.clone();
        stored.metadata.uid = prev.metadata.uid.clone();
        let generation = prev.metadata.generation.unwrap_or(1);
        let spec_changed = without_status(&prev.data) != without_status(&obj.data);
        stored.metadata.generation = Some(if spec_changed { generation + 1 } else { generation });
        let status = prev.data.get("status").cloned();
        let mut data = take_data(&mut stored);
        data.remove("status");
        if let Some(status) = status {
            data.insert("status".into(), status);
        }
        stored.data = Json::Object(data);
        stored.metadata.resource_version = Some(st.bump());
        debug!(kind = %gvk.kind, %key, rv = ?stored.metadata.resource_version, "updated");
        st.objects.insert(s, stored.clone());
        Ok(stored)
    }

    async fn update_status(&self, gvk: &GroupVersionKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = key_of(obj)?;
        let mut st = self.state();
        st.record(Verb::UpdateStatus, gvk, Some(&key), obj.metadata.resource_version.as_deref())?;
        let s = slot(gvk, &key);
        let Some(prev) = st.objects.get(&s) else {
            return Err(StoreError::NotFound(format!("{} {}", gvk.kind, key)));
        };
        Self::check_version(prev, obj.metadata.resource_version.as_deref(), &key)?;

        let mut stored = prev.clone();
        let mut data = take_data(&mut stored);
        match obj.data.get("status") {
            Some(status) => data.insert("status".into(), status.clone()),
            None => data.remove("status"),
        };
        stored.data = Json::Object(data);
        stored.metadata.resource_version = Some(st.bump());
        st.objects.insert(s, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, gvk: &GroupVersionKind, key: &ObjectKey) -> Result<(), StoreError> {
        let mut st = self.state();
        st.record(Verb::Delete, gvk, Some(key), None)?;
        match st.objects.remove(&slot(gvk, key)) {
            Some(_) => {
                debug!(kind = %gvk.kind, %key, "deleted");
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("{} {}", gvk.kind, key))),
        }
    }
}
