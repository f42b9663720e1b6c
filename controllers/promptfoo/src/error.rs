//! Controller-specific error types.
//!
//! Every failure raised while reconciling carries the child object and the
//! store operation it happened on, so the dispatcher log line is enough to
//! tell which half of a pass broke.

use kube::Error as KubeError;
use kube_store::{ObjectKey, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the PromptFoo Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Reading the PromptFooConfig failed for a reason other than not-found
    #[error("Failed to fetch PromptFooConfig {key}: {source}")]
    Fetch {
        /// Identity that was being fetched
        key: ObjectKey,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Owner reference for a child could not be built
    #[error("Cannot build owner reference for {child}: PromptFooConfig has no name or uid")]
    OwnerReference {
        /// Kind of the child being projected
        child: &'static str,
    },

    /// Prompt could not be rendered into the child payload
    #[error("Failed to serialize prompt for {child}: {source}")]
    Serialization {
        /// Kind of the child being projected
        child: &'static str,
        /// YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// Create or replace of a child failed
    #[error("Failed to {operation} {child}: {source}")]
    Store {
        /// Kind of the child being written
        child: &'static str,
        /// Store operation that failed
        operation: &'static str,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// Store call exceeded its deadline
    #[error("{operation} did not complete within {timeout:?}")]
    Timeout {
        /// Store operation that timed out
        operation: &'static str,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch or probe server failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Short label used for the `result` dimension of reconcile metrics
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            ControllerError::Fetch { .. } => "fetch_error",
            ControllerError::OwnerReference { .. } => "owner_reference_error",
            ControllerError::Serialization { .. } => "serialization_error",
            ControllerError::Store { source, .. } if source.is_conflict() => "conflict",
            ControllerError::Store { .. } => "store_error",
            ControllerError::Timeout { .. } => "timeout",
            ControllerError::InvalidConfig(_)
            | ControllerError::Kube(_)
            | ControllerError::Metrics(_)
            | ControllerError::Watch(_) => "error",
        }
    }
}
