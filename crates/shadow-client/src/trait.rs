//! Store traits for the Shadow controller
//!
//! These traits abstract the cache-backed Kubernetes access so the reconciler
//! can be unit tested against in-memory implementations.
//! `get` and `list` read the local, eventually-consistent cache; `create`,
//! `update` and `update_status` are authoritative writes.

use crate::error::StoreError;
use crds::Shadow;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;

/// Declared-state store: `Shadow` objects
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait DeclaredStore: Send + Sync {
    /// Look up a Shadow in the cache. `Ok(None)` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Shadow>>, StoreError>;

    /// List cached Shadows, optionally restricted to one namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<Shadow>>, StoreError>;

    /// Create a Shadow
    async fn create(&self, shadow: &Shadow) -> Result<Shadow, StoreError>;

    /// Replace a Shadow (optimistic concurrency on `resourceVersion`)
    async fn update(&self, shadow: &Shadow) -> Result<Shadow, StoreError>;

    /// Write the Shadow's status subresource
    async fn update_status(&self, namespace: &str, name: &str, status: &str) -> Result<Shadow, StoreError>;
}

/// Managed-state store: `Pod` objects
#[async_trait::async_trait]
pub trait ManagedStore: Send + Sync {
    /// Look up a Pod in the cache. `Ok(None)` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<Pod>>, StoreError>;

    /// List cached Pods, optionally restricted to one namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Arc<Pod>>, StoreError>;

    /// Create a Pod
    async fn create(&self, pod: &Pod) -> Result<Pod, StoreError>;

    /// Replace a Pod (optimistic concurrency on `resourceVersion`)
    async fn update(&self, pod: &Pod) -> Result<Pod, StoreError>;
}
