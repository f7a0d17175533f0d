//! Notification dispatch.
//!
//! The watch layer turns raw watch events into [`Notification`]s and sends
//! them over a bounded channel. The dispatcher maps each one to at most one
//! work key:
//! - a Shadow added or updated enqueues its own key
//! - a Pod added, updated or deleted enqueues the key of its controlling
//!   Shadow, which is what recreates a Pod deleted out of band
//! - a Pod update that did not change `resourceVersion` (a resync) enqueues
//!   nothing

use crate::key::ObjectKey;
use crate::queue::WorkQueue;
use crate::resources::controller_of;
use crds::Shadow;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use shadow_client::DeclaredStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Identity of an object whose final state is unknown
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectIdentity {
    pub namespace: String,
    pub name: String,
    /// Owner references as last observed
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectIdentity {
    /// Identity of a live object, or `None` when it has no name
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        let key = ObjectKey::for_object(obj)?;
        Some(Self {
            namespace: key.namespace,
            name: key.name,
            owner_references: obj.meta().owner_references.clone().unwrap_or_default(),
        })
    }
}

/// A deleted object: its last live state, or just its identity
#[derive(Debug, Clone)]
pub enum Observed<K> {
    /// Final state of the object as delivered by the watch
    Live(Arc<K>),
    /// Object vanished while the watch was not looking
    Tombstone(ObjectIdentity),
}

/// One observed change to an object of kind `K`
#[derive(Debug, Clone)]
pub enum Change<K> {
    Added(Arc<K>),
    Updated {
        /// `resourceVersion` last seen before this update
        old_resource_version: Option<String>,
        new: Arc<K>,
    },
    Deleted(Observed<K>),
}

/// Change notification from either watch stream
#[derive(Debug, Clone)]
pub enum Notification {
    Shadow(Change<Shadow>),
    Pod(Change<Pod>),
}

/// Key to enqueue for a Shadow change. Deletions enqueue nothing: the
/// API server garbage-collects owned Pods.
pub fn shadow_key(change: &Change<Shadow>) -> Option<ObjectKey> {
    match change {
        Change::Added(shadow) | Change::Updated { new: shadow, .. } => ObjectKey::for_object::<Shadow>(shadow),
        Change::Deleted(_) => None,
    }
}

/// Key of the Shadow controlling the changed Pod, if any
pub fn pod_owner_key(change: &Change<Pod>) -> Option<ObjectKey> {
    match change {
        Change::Added(pod) => owner_key(&pod.metadata),
        Change::Updated {
            old_resource_version,
            new,
        } => {
            if old_resource_version.is_some() && *old_resource_version == new.metadata.resource_version {
                return None;
            }
            owner_key(&new.metadata)
        }
        Change::Deleted(Observed::Live(pod)) => owner_key(&pod.metadata),
        Change::Deleted(Observed::Tombstone(identity)) => {
            debug!("Recovered deleted object '{}' from tombstone", identity.name);
            let meta = ObjectMeta {
                name: Some(identity.name.clone()),
                namespace: Some(identity.namespace.clone()),
                owner_references: Some(identity.owner_references.clone()),
                ..Default::default()
            };
            owner_key(&meta)
        }
    }
}

fn owner_key(meta: &ObjectMeta) -> Option<ObjectKey> {
    let owner = controller_of(meta)?;
    if owner.kind != Shadow::kind(&()) {
        return None;
    }
    Some(ObjectKey::new(
        meta.namespace.clone().unwrap_or_default(),
        owner.name.clone(),
    ))
}

/// Feeds the work queue from watch notifications
pub struct Dispatcher {
    queue: WorkQueue<String>,
    shadows: Arc<dyn DeclaredStore>,
}

impl Dispatcher {
    /// Creates a new dispatcher feeding `queue`.
    pub fn new(queue: WorkQueue<String>, shadows: Arc<dyn DeclaredStore>) -> Self {
        Self { queue, shadows }
    }

    /// Handle one notification
    pub async fn dispatch(&self, notification: Notification) {
        match notification {
            Notification::Shadow(change) => {
                if let Some(key) = shadow_key(&change) {
                    debug!(key = %key, "Enqueueing Shadow");
                    self.queue.add(key.to_string());
                }
            }
            Notification::Pod(change) => {
                let Some(key) = pod_owner_key(&change) else {
                    return;
                };
                match self.shadows.get(&key.namespace, &key.name).await {
                    Ok(Some(_)) => {
                        debug!(key = %key, "Enqueueing owner of changed Pod");
                        self.queue.add(key.to_string());
                    }
                    Ok(None) => {
                        debug!("Ignoring orphaned object of shadow '{}'", key);
                    }
                    Err(e) => {
                        warn!("Failed to look up owner Shadow '{}': {}", key, e);
                    }
                }
            }
        }
    }

    /// Dispatch notifications until every sender is dropped
    pub async fn run(self, mut notifications: mpsc::Receiver<Notification>) {
        info!("Starting notification dispatcher");
        while let Some(notification) = notifications.recv().await {
            self.dispatch(notification).await;
        }
        info!("Notification dispatcher stopped");
    }
}
