//! Store client errors

use thiserror::Error;

/// Errors that can occur when reading or writing Shadow and Pod objects
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API request/response error
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// Object does not exist on the API server
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create rejected because an object with the same name exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Write rejected because the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object is missing identity fields required for the request
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 404 => {
                Self::NotFound(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
                Self::AlreadyExists(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 409 => {
                Self::Conflict(response.message.clone())
            }
            _ => Self::Kube(err),
        }
    }
}
