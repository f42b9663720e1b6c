//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::config::{ControllerConfig, DriftPolicy};
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crds::{PromptFooConfig, PromptFooConfigSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_store::{MockObjectStore, ObjectKey, ObjectStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Helper to create a test PromptFooConfig with a fixed uid derived from its name
pub fn create_test_prompt_config(
    name: &str,
    namespace: &str,
    prompt: &[(&str, &str)],
    schedule: &str,
) -> PromptFooConfig {
    PromptFooConfig {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            ..Default::default()
        },
        spec: PromptFooConfigSpec {
            prompt: prompt
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            schedule: schedule.to_string(),
            open_ai_api_key: "sk-test".to_string(),
        },
        status: None,
    }
}

/// Helper to build a controller configuration for tests
pub fn test_config(drift_policy: DriftPolicy) -> ControllerConfig {
    ControllerConfig {
        drift_policy,
        store_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Helper to create a reconciler backed by `store`
pub fn create_test_reconciler(store: &MockObjectStore, drift_policy: DriftPolicy) -> Reconciler {
    create_test_reconciler_with_config(store, &test_config(drift_policy))
}

/// Helper to create a reconciler backed by `store` with an explicit configuration
pub fn create_test_reconciler_with_config(
    store: &MockObjectStore,
    config: &ControllerConfig,
) -> Reconciler {
    let store: Arc<dyn ObjectStore> = Arc::new(store.clone());
    Reconciler::new(store, config, Metrics::new().unwrap())
}

/// Key of the children derived from the PromptFooConfig `namespace/name`
pub fn child_key(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::new(namespace, crate::reconciler::child_name(name))
}
