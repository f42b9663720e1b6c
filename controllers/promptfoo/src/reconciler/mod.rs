//! Reconciliation logic for PromptFooConfig.
//!
//! A pass fetches the current PromptFooConfig and projects it into two
//! children, in this order:
//! - `config_map`: the `promptfooconfig.yaml` payload
//! - `cron_job`: the scheduled evaluation that mounts the payload
//!
//! The first failing projection aborts the pass. Nothing is cached between
//! passes; retries and per-object serialization belong to the dispatcher.

pub mod config_map;
pub mod cron_job;

use crate::backoff::FibonacciBackoff;
use crate::config::{ControllerConfig, DriftPolicy, JobTemplateConfig};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crds::PromptFooConfig;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_store::{Mutation, ObjectKey, ObjectStore, OperationResult, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Prefix of the name shared by both children of a PromptFooConfig
pub const CHILD_NAME_PREFIX: &str = "promptfoo-";

/// Name of the ConfigMap and CronJob derived from a PromptFooConfig named `parent`
#[must_use]
pub fn child_name(parent: &str) -> String {
    format!("{CHILD_NAME_PREFIX}{parent}")
}

/// Labels stamped on every child
pub(crate) fn managed_labels(config: &PromptFooConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "promptfoo".to_string()),
        ("app.kubernetes.io/instance".to_string(), config.name_any()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "promptfoo-controller".to_string(),
        ),
    ])
}

/// Controller owner reference pointing at `config`, blocking foreground
/// deletion of the parent until the child is gone
pub(crate) fn owner_reference(
    config: &PromptFooConfig,
    child: &'static str,
) -> Result<OwnerReference, ControllerError> {
    config
        .controller_owner_ref(&())
        .map(|owner| OwnerReference {
            block_owner_deletion: Some(true),
            ..owner
        })
        .ok_or(ControllerError::OwnerReference { child })
}

/// Metadata shared by both children: derived name, parent namespace, labels, owner
pub(crate) fn child_metadata(
    config: &PromptFooConfig,
    child: &'static str,
) -> Result<ObjectMeta, ControllerError> {
    let owner = owner_reference(config, child)?;
    Ok(ObjectMeta {
        name: Some(child_name(&config.name_any())),
        namespace: config.namespace(),
        labels: Some(managed_labels(config)),
        owner_references: Some(vec![owner]),
        ..Default::default()
    })
}

/// Re-apply desired labels and owner references onto a live object's metadata.
///
/// Labels are merged so labels added by other tools survive.
pub(crate) fn enforce_metadata(live: &mut ObjectMeta, desired: &ObjectMeta) {
    if let Some(labels) = &desired.labels {
        let live_labels = live.labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in labels {
            live_labels.insert(key.clone(), value.clone());
        }
    }

    for owner in desired.owner_references.iter().flatten() {
        let refs = live.owner_references.get_or_insert_with(Vec::new);
        if refs.contains(owner) {
            continue;
        }
        let is_controller = owner.controller == Some(true);
        refs.retain(|r| r.uid != owner.uid && !(is_controller && r.controller == Some(true)));
        refs.push(owner.clone());
    }
}

/// Mutation hook for the configured drift policy.
///
/// `CreateOnly` leaves existing objects untouched; `Enforce` runs `enforce`
/// on the live copy.
pub(crate) fn drift_hook<K, F>(policy: DriftPolicy, enforce: F) -> Box<Mutation<K>>
where
    K: 'static,
    F: Fn(&mut K) + Send + Sync + 'static,
{
    match policy {
        DriftPolicy::CreateOnly => Box::new(|_: &mut K| -> Result<(), StoreError> { Ok(()) }),
        DriftPolicy::Enforce => Box::new(move |live: &mut K| -> Result<(), StoreError> {
            enforce(live);
            Ok(())
        }),
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone, Default)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// How a pass ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Reconciled,
    NotFound,
}

/// Reconciles PromptFooConfig resources into their ConfigMap and CronJob.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) job_template: JobTemplateConfig,
    pub(crate) drift_policy: DriftPolicy,
    store_timeout: Duration,
    metrics: Metrics,
    /// Error count tracking per resource
    backoff_states: Arc<Mutex<HashMap<ObjectKey, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("job_template", &self.job_template)
            .field("drift_policy", &self.drift_policy)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(store: Arc<dyn ObjectStore>, config: &ControllerConfig, metrics: Metrics) -> Self {
        Self {
            store,
            job_template: config.job_template.clone(),
            drift_policy: config.drift_policy,
            store_timeout: config.store_timeout,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Metrics recorded by this reconciler
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Reconcile the PromptFooConfig identified by `key`.
    ///
    /// A missing PromptFooConfig is not an error: its children are left to
    /// the garbage collector and no write is issued.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ControllerError> {
        let started = Instant::now();
        let result = self.reconcile_pass(key).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                let label = match outcome {
                    PassOutcome::Reconciled => "success",
                    PassOutcome::NotFound => "not_found",
                };
                self.metrics.record_reconcile(label, elapsed);
                self.reset_error(key);
                Ok(Action::await_change())
            }
            Err(e) => {
                self.metrics.record_reconcile(e.metric_label(), elapsed);
                Err(e)
            }
        }
    }

    /// Reconcile the object handed over by the dispatcher.
    ///
    /// Only its identity is used; the pass re-reads the current state.
    pub async fn reconcile_object(&self, config: &PromptFooConfig) -> Result<Action, ControllerError> {
        match ObjectKey::from_resource(config) {
            Some(key) => self.reconcile(&key).await,
            None => {
                warn!("Ignoring PromptFooConfig event without name or namespace");
                Ok(Action::await_change())
            }
        }
    }

    async fn reconcile_pass(&self, key: &ObjectKey) -> Result<PassOutcome, ControllerError> {
        let fetched = self
            .with_deadline("get PromptFooConfig", self.store.get_prompt_config(key))
            .await?
            .map_err(|source| ControllerError::Fetch {
                key: key.clone(),
                source,
            })?;

        let Some(config) = fetched else {
            debug!("PromptFooConfig {} not found, nothing to reconcile", key);
            return Ok(PassOutcome::NotFound);
        };

        info!("Reconciling PromptFooConfig {}", key);
        let config_map = self.reconcile_config_map(&config).await?;
        let cron_job = self.reconcile_cron_job(&config).await?;
        info!(
            "Reconciled PromptFooConfig {}: ConfigMap {}, CronJob {}",
            key, config_map, cron_job
        );

        Ok(PassOutcome::Reconciled)
    }

    /// Run a store call under the configured deadline
    pub(crate) async fn with_deadline<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = T>,
    ) -> Result<T, ControllerError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_elapsed| ControllerError::Timeout {
                operation,
                timeout: self.store_timeout,
            })
    }

    pub(crate) fn record_child_operation(&self, child: &'static str, result: OperationResult) {
        self.metrics.record_child_operation(child, result.as_str());
    }

    /// Next requeue delay for a failing resource
    pub fn get_backoff_for_resource(&self, key: &ObjectKey) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.clone()).or_default();
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(60), 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, key: &ObjectKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.entry(key.clone()).or_default().increment_error();
        }
    }

    /// Forget the error history of a resource (on successful reconciliation
    /// or once it is gone)
    pub fn reset_error(&self, key: &ObjectKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_prompt_config;

    #[test]
    fn test_child_name_is_prefixed_parent_name() {
        assert_eq!(child_name("nightly"), "promptfoo-nightly");
        assert_eq!(child_name(""), "promptfoo-");
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let mut config = create_test_prompt_config("demo", "default", &[], "* * * * *");
        config.metadata.uid = None;

        let err = owner_reference(&config, "ConfigMap").unwrap_err();
        assert!(matches!(err, ControllerError::OwnerReference { child: "ConfigMap" }));
    }

    #[test]
    fn test_owner_reference_marks_controller() {
        let config = create_test_prompt_config("demo", "default", &[], "* * * * *");
        let owner = owner_reference(&config, "CronJob").unwrap();

        assert_eq!(owner.kind, "PromptFooConfig");
        assert_eq!(owner.api_version, "promptfoo.promptfoo.x-k8s.io/v1");
        assert_eq!(owner.name, "demo");
        assert_eq!(Some(owner.uid), config.metadata.uid);
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn test_enforce_metadata_merges_labels_and_replaces_controller() {
        let config = create_test_prompt_config("demo", "default", &[], "* * * * *");
        let desired = child_metadata(&config, "ConfigMap").unwrap();

        let mut stale_owner = owner_reference(&config, "ConfigMap").unwrap();
        stale_owner.uid = "previous-uid".to_string();
        let mut live = ObjectMeta {
            labels: Some(BTreeMap::from([
                ("team".to_string(), "evals".to_string()),
                ("app.kubernetes.io/name".to_string(), "edited".to_string()),
            ])),
            owner_references: Some(vec![stale_owner]),
            ..Default::default()
        };

        enforce_metadata(&mut live, &desired);

        let labels = live.labels.unwrap();
        assert_eq!(labels["team"], "evals");
        assert_eq!(labels["app.kubernetes.io/name"], "promptfoo");
        assert_eq!(live.owner_references, desired.owner_references);
    }

    #[test]
    fn test_backoff_tracks_failures_per_resource() {
        let reconciler = crate::test_utils::create_test_reconciler(
            &kube_store::MockObjectStore::new(),
            DriftPolicy::CreateOnly,
        );
        let failing = ObjectKey::new("default", "failing");
        let healthy = ObjectKey::new("default", "healthy");

        reconciler.increment_error(&failing);
        assert_eq!(reconciler.get_backoff_for_resource(&failing), (Duration::from_secs(60), 1));
        reconciler.increment_error(&failing);
        assert_eq!(reconciler.get_backoff_for_resource(&failing), (Duration::from_secs(60), 2));
        assert_eq!(reconciler.get_backoff_for_resource(&failing).0, Duration::from_secs(120));

        assert_eq!(reconciler.get_backoff_for_resource(&healthy), (Duration::from_secs(60), 0));

        reconciler.reset_error(&failing);
        assert!(!reconciler.backoff_states.lock().unwrap().contains_key(&failing));
        assert_eq!(reconciler.get_backoff_for_resource(&failing), (Duration::from_secs(60), 0));
    }
}
