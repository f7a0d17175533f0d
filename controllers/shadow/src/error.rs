//! Controller-specific error types.
//!
//! This module defines error types specific to the Shadow Controller
//! that are not covered by upstream library errors.

use shadow_client::StoreError;
use thiserror::Error;

/// Errors that can occur in the Shadow Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Work key could not be split into namespace and name
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    /// Shadow spec can never be satisfied as written
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// A Pod with the requested name exists and belongs to someone else
    #[error("Resource {0:?} already exists and is not managed by Shadow")]
    ResourceExists(String),

    /// Object lacks metadata the controller needs (name, uid)
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),

    /// Store read/write error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Caches did not finish their initial sync
    #[error("Cache sync failed: {0}")]
    CacheSync(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics server could not bind or serve
    #[error("Metrics server error: {0}")]
    Server(#[from] std::io::Error),
}

impl ControllerError {
    /// Whether the work key should be requeued with back-off.
    ///
    /// Malformed keys and unsatisfiable specs are permanent: only a new
    /// watch event can change the outcome, so they are dropped.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerError::ResourceExists(_) | ControllerError::Store(_) | ControllerError::Kube(_)
        )
    }
}
