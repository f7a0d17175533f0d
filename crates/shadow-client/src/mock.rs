//! In-memory stores for unit testing
//!
//! `MockStore` behaves like a cache that is always perfectly in sync with
//! the API server: writes are visible to the next `get`. Every write is
//! logged so tests can assert exactly which calls a reconcile made.

use crate::error::StoreError;
use crate::events::{EventRecorder, EventType};
use crate::store_trait::{DeclaredStore, ManagedStore};
use crds::Shadow;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A write performed through a mock store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// `create(namespace, name)`
    Create(String, String),
    /// `update(namespace, name)`
    Update(String, String),
    /// `update_status(namespace, name, status)`
    UpdateStatus(String, String, String),
}

/// In-memory store for one namespaced resource kind
#[derive(Clone)]
pub struct MockStore<K> {
    objects: Arc<Mutex<BTreeMap<(String, String), K>>>,
    writes: Arc<Mutex<Vec<WriteOp>>>,
    fail_writes: Arc<Mutex<Option<String>>>,
    next_version: Arc<Mutex<u64>>,
}

impl<K> Default for MockStore<K> {
    fn default() -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(Mutex::new(None)),
            next_version: Arc::new(Mutex::new(1)),
        }
    }
}

impl<K> MockStore<K>
where
    K: Resource + Clone + Send + Sync,
{
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object directly (for test setup; not logged as a write).
    ///
    /// Assigns `uid` and `resourceVersion` when missing, like the API server.
    pub fn insert(&self, obj: K) -> K {
        let obj = self.stamp(obj);
        lock(&self.objects).insert(Self::key(&obj), obj.clone());
        obj
    }

    /// Remove an object directly, as if deleted out of band
    pub fn remove(&self, namespace: &str, name: &str) -> Option<K> {
        lock(&self.objects).remove(&(namespace.to_string(), name.to_string()))
    }

    /// Current stored copy of an object
    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        lock(&self.objects)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    /// True when no objects are stored
    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }

    /// Every write performed so far, in order
    pub fn writes(&self) -> Vec<WriteOp> {
        lock(&self.writes).clone()
    }

    /// Forget the write log
    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    /// Make every subsequent write fail with an API error carrying `message`
    pub fn fail_writes_with(&self, message: impl Into<String>) {
        *lock(&self.fail_writes) = Some(message.into());
    }

    /// Let writes succeed again
    pub fn clear_failure(&self) {
        *lock(&self.fail_writes) = None;
    }

    fn key(obj: &K) -> (String, String) {
        (obj.namespace().unwrap_or_default(), obj.name_any())
    }

    fn stamp(&self, mut obj: K) -> K {
        let version = {
            let mut next = lock(&self.next_version);
            let current = *next;
            *next += 1;
            current
        };
        let meta = obj.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        meta.resource_version = Some(version.to_string());
        obj
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        match lock(&self.fail_writes).as_ref() {
            Some(message) => Err(StoreError::Conflict(message.clone())),
            None => Ok(()),
        }
    }

    fn get_object(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.object(namespace, name).map(Arc::new)
    }

    fn list_objects(&self, namespace: Option<&str>) -> Vec<Arc<K>> {
        lock(&self.objects)
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| ns == wanted))
            .map(|(_, obj)| Arc::new(obj.clone()))
            .collect()
    }

    fn create_object(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = Self::key(obj);
        lock(&self.writes).push(WriteOp::Create(namespace.clone(), name.clone()));
        self.check_failure()?;
        if name.is_empty() {
            return Err(StoreError::InvalidObject("metadata.name is required".to_string()));
        }
        let mut objects = lock(&self.objects);
        if objects.contains_key(&(namespace.clone(), name.clone())) {
            return Err(StoreError::AlreadyExists(format!("{namespace}/{name}")));
        }
        let mut created = obj.clone();
        created.meta_mut().uid = None;
        let created = self.stamp(created);
        objects.insert((namespace, name), created.clone());
        Ok(created)
    }

    fn update_object(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = Self::key(obj);
        lock(&self.writes).push(WriteOp::Update(namespace.clone(), name.clone()));
        self.check_failure()?;
        let mut objects = lock(&self.objects);
        let existing = objects
            .get(&(namespace.clone(), name.clone()))
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))?;
        if obj.meta().resource_version.is_some()
            && obj.meta().resource_version != existing.meta().resource_version
        {
            return Err(StoreError::Conflict(format!("{namespace}/{name} has been modified")));
        }
        let updated = self.stamp(obj.clone());
        objects.insert((namespace, name), updated.clone());
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl DeclaredStore for MockStore<Shadow> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Shadow>>, StoreError> {
        Ok(self.get_object(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<Shadow>>, StoreError> {
        Ok(self.list_objects(namespace))
    }

    async fn create(&self, shadow: &Shadow) -> Result<Shadow, StoreError> {
        self.create_object(shadow)
    }

    async fn update(&self, shadow: &Shadow) -> Result<Shadow, StoreError> {
        self.update_object(shadow)
    }

    async fn update_status(&self, namespace: &str, name: &str, status: &str) -> Result<Shadow, StoreError> {
        lock(&self.writes).push(WriteOp::UpdateStatus(
            namespace.to_string(),
            name.to_string(),
            status.to_string(),
        ));
        self.check_failure()?;
        let mut objects = lock(&self.objects);
        let mut shadow = objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{namespace}/{name}")))?;
        shadow.status = Some(status.to_string());
        let shadow = self.stamp(shadow);
        objects.insert((namespace.to_string(), name.to_string()), shadow.clone());
        Ok(shadow)
    }
}

#[async_trait::async_trait]
impl ManagedStore for MockStore<Pod> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Pod>>, StoreError> {
        Ok(self.get_object(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<Pod>>, StoreError> {
        Ok(self.list_objects(namespace))
    }

    async fn create(&self, pod: &Pod) -> Result<Pod, StoreError> {
        self.create_object(pod)
    }

    async fn update(&self, pod: &Pod) -> Result<Pod, StoreError> {
        self.update_object(pod)
    }
}

/// An event captured by [`MockEventRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Namespace of the Shadow the event was recorded against
    pub namespace: String,
    /// Name of the Shadow the event was recorded against
    pub name: String,
    /// Event severity
    pub event_type: EventType,
    /// Stable reason code
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

/// Event recorder that keeps events in memory
#[derive(Clone, Default)]
pub struct MockEventRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MockEventRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, in order
    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    /// Number of events recorded with `reason`
    pub fn count(&self, reason: &str) -> usize {
        lock(&self.events).iter().filter(|e| e.reason == reason).count()
    }
}

#[async_trait::async_trait]
impl EventRecorder for MockEventRecorder {
    async fn record(
        &self,
        shadow: &Shadow,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        lock(&self.events).push(RecordedEvent {
            namespace: shadow.namespace().unwrap_or_default(),
            name: shadow.name_any(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}
