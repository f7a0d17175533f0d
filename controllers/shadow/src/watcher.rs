//! Kubernetes resource watchers.
//!
//! Each watched kind runs one `kube_runtime::watcher` stream through a
//! `reflector` writer, so the caches behind the stores stay current. The same
//! stream is folded through a [`WatchIndex`] that remembers the last seen
//! version of every object and turns raw watch events into [`Change`]s.
//!
//! A relist (`Init` .. `InitDone`) replaces the watcher's view wholesale.
//! Anything the index knew about that the relist did not return was deleted
//! while the watch was disconnected; it is reported as a tombstone.

use crate::dispatcher::{Change, Notification, ObjectIdentity, Observed};
use crate::error::ControllerError;
use crate::key::ObjectKey;
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::reflector::store::Writer;
use kube_runtime::{WatchStreamExt, reflector, watcher};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the index remembers about one object
struct Seen {
    resource_version: Option<String>,
    identity: ObjectIdentity,
}

/// Last seen version and identity of every object of one kind
pub struct WatchIndex<K> {
    objects: HashMap<ObjectKey, Seen>,
    /// Keys returned so far by an in-progress relist
    relisted: Option<HashSet<ObjectKey>>,
    kind: PhantomData<fn() -> K>,
}

impl<K> Default for WatchIndex<K> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            relisted: None,
            kind: PhantomData,
        }
    }
}

impl<K: Resource> WatchIndex<K> {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently known
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Fold one watch event into the index, returning the changes it implies
    pub fn apply(&mut self, event: watcher::Event<K>) -> Vec<Change<K>> {
        match event {
            watcher::Event::Apply(obj) => self.upsert(obj).into_iter().collect(),
            watcher::Event::Delete(obj) => {
                let Some(key) = ObjectKey::for_object(&obj) else {
                    return Vec::new();
                };
                self.objects.remove(&key);
                vec![Change::Deleted(Observed::Live(Arc::new(obj)))]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let (Some(seen), Some(key)) = (self.relisted.as_mut(), ObjectKey::for_object(&obj)) {
                    seen.insert(key);
                }
                self.upsert(obj).into_iter().collect()
            }
            watcher::Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let vanished: Vec<ObjectKey> = self
                    .objects
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                vanished
                    .into_iter()
                    .filter_map(|key| self.objects.remove(&key))
                    .map(|last| Change::Deleted(Observed::Tombstone(last.identity)))
                    .collect()
            }
        }
    }

    fn upsert(&mut self, obj: K) -> Option<Change<K>> {
        let key = ObjectKey::for_object(&obj)?;
        let identity = ObjectIdentity::of(&obj)?;
        let seen = Seen {
            resource_version: obj.meta().resource_version.clone(),
            identity,
        };
        let new = Arc::new(obj);
        let change = match self.objects.insert(key, seen) {
            Some(old) => Change::Updated {
                old_resource_version: old.resource_version,
                new,
            },
            None => Change::Added(new),
        };
        Some(change)
    }
}

/// Watch one resource kind, keeping `writer`'s cache current and sending a
/// notification for every change.
///
/// Returns `Ok(())` once the receiving side is gone. Watch errors are logged
/// and retried with the default back-off.
pub async fn watch<K>(
    api: Api<K>,
    writer: Writer<K>,
    notifications: mpsc::Sender<Notification>,
    wrap: fn(Change<K>) -> Notification,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let kind = K::kind(&());
    info!("Starting {} watcher", kind);

    let mut index = WatchIndex::<K>::new();
    let mut stream = pin!(reflector(
        writer,
        watcher(api, watcher::Config::default()).default_backoff()
    ));

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("{} watch error (retrying): {}", kind, e);
                continue;
            }
        };
        let relist_done = matches!(event, watcher::Event::InitDone);
        let changes = index.apply(event);
        if relist_done {
            info!("{} watcher listed {} objects", kind, index.len());
        }
        for change in changes {
            if notifications.send(wrap(change)).await.is_err() {
                debug!("{} watcher stopping: dispatcher is gone", kind);
                return Ok(());
            }
        }
    }

    Err(ControllerError::Watch(format!("{kind} watch stream ended")))
}
