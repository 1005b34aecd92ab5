//! Watch-driven event source: turns changes to `AdvDeployment` objects and the
//! Services and Deployments they own into reconcile keys.

use std::fmt::Debug;

use anyhow::Result;
use futures::TryStreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use keel_core::crd::AdvDeployment;
use keel_core::{NamespacePolicy, ObjectKey};
use kube::{
    api::Api,
    runtime::watcher::{self, Event},
    Client, Resource,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Key of the `AdvDeployment` controlling `obj`, if any.
pub fn owner_key<K: Resource>(obj: &K) -> Option<ObjectKey> {
    let meta = obj.meta();
    let owner = meta
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true) && r.kind == AdvDeployment::kind(&()))?;
    Some(ObjectKey::new(meta.namespace.as_deref(), &owner.name))
}

/// Key of a top-level object itself.
pub fn self_key<K: Resource>(obj: &K) -> Option<ObjectKey> {
    ObjectKey::from_meta(obj.meta())
}

/// Watch all three kinds until the channel closes or a watch fails.
pub async fn run_event_source(client: Client, policy: NamespacePolicy, tx: mpsc::Sender<ObjectKey>) -> Result<()> {
    info!(namespaces = ?policy.allowed(), "event source started");
    tokio::try_join!(
        pump(Api::<AdvDeployment>::all(client.clone()), "AdvDeployment", &policy, &tx, self_key::<AdvDeployment>),
        pump(Api::<Service>::all(client.clone()), "Service", &policy, &tx, owner_key::<Service>),
        pump(Api::<Deployment>::all(client), "Deployment", &policy, &tx, owner_key::<Deployment>),
    )?;
    Ok(())
}

async fn pump<K, F>(api: Api<K>, kind: &'static str, policy: &NamespacePolicy, tx: &mpsc::Sender<ObjectKey>, key_of: F) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(&K) -> Option<ObjectKey>,
{
    let stream = watcher::watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);
    info!(kind, "watcher started");

    while let Some(ev) = stream.try_next().await? {
        let objects = match ev {
            Event::Applied(o) | Event::Deleted(o) => vec![o],
            Event::Restarted(list) => {
                debug!(kind, count = list.len(), "watch restarted");
                list
            }
        };
        for obj in &objects {
            let Some(key) = key_of(obj) else { continue };
            if !policy.admits(key.namespace.as_deref()) {
                continue;
            }
            counter!("watch_events_total", 1u64, "kind" => kind);
            if tx.send(key).await.is_err() {
                warn!(kind, "key channel closed; stopping watcher");
                return Ok(());
            }
        }
    }
    Ok(())
}
