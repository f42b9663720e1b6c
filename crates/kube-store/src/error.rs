//! Object store errors

use thiserror::Error;

/// Errors that can occur when reading or writing objects
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Write rejected because the object changed since it was read (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object is missing a field required to address it
    #[error("Object is missing required field {0}")]
    MissingField(&'static str),

    /// Failure injected by the mock store
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Whether the error came from an optimistic-concurrency conflict
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
