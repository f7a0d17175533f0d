//! Cache-backed store implementation
//!
//! `KubeStore` pairs a reflector cache (reads) with a kube client (writes).
//! The reflector writer half is driven by the controller's watch tasks; this
//! type only ever reads from the cache.

use crate::error::StoreError;
use crate::store_trait::{DeclaredStore, ManagedStore};
use crds::Shadow;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Store for one namespaced resource kind, reading through a reflector cache
#[derive(Clone)]
pub struct KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    client: Client,
    cache: Store<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    /// Create a store over an existing reflector cache
    pub fn new(client: Client, cache: Store<K>) -> Self {
        Self { client, cache }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cached(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.cache.get(&ObjectRef::new(name).within(namespace))
    }

    fn cached_list(&self, namespace: Option<&str>) -> Vec<Arc<K>> {
        self.cache
            .state()
            .into_iter()
            .filter(|obj| namespace.is_none_or(|ns| obj.namespace().as_deref() == Some(ns)))
            .collect()
    }

    fn identity(obj: &K) -> Result<(String, String), StoreError> {
        let name = obj.meta().name.clone().ok_or_else(|| {
            StoreError::InvalidObject(format!("{} is missing metadata.name", K::kind(&())))
        })?;
        let namespace = obj.meta().namespace.clone().ok_or_else(|| {
            StoreError::InvalidObject(format!("{} {} is missing metadata.namespace", K::kind(&()), name))
        })?;
        Ok((namespace, name))
    }

    async fn create_object(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = Self::identity(obj)?;
        debug!("Creating {} {}/{}", K::kind(&()), namespace, name);
        Ok(self.api(&namespace).create(&PostParams::default(), obj).await?)
    }

    async fn replace_object(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = Self::identity(obj)?;
        debug!("Replacing {} {}/{}", K::kind(&()), namespace, name);
        Ok(self.api(&namespace).replace(&name, &PostParams::default(), obj).await?)
    }
}

#[async_trait::async_trait]
impl DeclaredStore for KubeStore<Shadow> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Shadow>>, StoreError> {
        Ok(self.cached(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<Shadow>>, StoreError> {
        Ok(self.cached_list(namespace))
    }

    async fn create(&self, shadow: &Shadow) -> Result<Shadow, StoreError> {
        self.create_object(shadow).await
    }

    async fn update(&self, shadow: &Shadow) -> Result<Shadow, StoreError> {
        self.replace_object(shadow).await
    }

    async fn update_status(&self, namespace: &str, name: &str, status: &str) -> Result<Shadow, StoreError> {
        debug!("Updating Shadow {}/{} status to {}", namespace, name, status);
        let status_patch = serde_json::json!({
            "status": status
        });
        let pp = PatchParams::default();
        Ok(self
            .api(namespace)
            .patch_status(name, &pp, &Patch::Merge(&status_patch))
            .await?)
    }
}

#[async_trait::async_trait]
impl ManagedStore for KubeStore<Pod> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Pod>>, StoreError> {
        Ok(self.cached(namespace, name))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<Pod>>, StoreError> {
        Ok(self.cached_list(namespace))
    }

    async fn create(&self, pod: &Pod) -> Result<Pod, StoreError> {
        self.create_object(pod).await
    }

    async fn update(&self, pod: &Pod) -> Result<Pod, StoreError> {
        self.replace_object(pod).await
    }
}
