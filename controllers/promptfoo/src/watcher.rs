//! Kubernetes resource watchers.
//!
//! Drives the reconciler from `kube_runtime::Controller`: events on a
//! PromptFooConfig, or on a ConfigMap/CronJob it controls, trigger a pass
//! for that PromptFooConfig. The runtime serializes passes per object,
//! reconnects dropped watches and requeues failures through
//! [`error_policy`].

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::server::{self, ProbeState};
use crds::PromptFooConfig;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use kube::api::ListParams;
use kube_runtime::controller::{Action, Config as RuntimeConfig, Error as RuntimeError};
use kube_runtime::{Controller, watcher};
use kube_store::ObjectKey;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Label selector matching the children this controller writes
const MANAGED_CHILDREN_SELECTOR: &str = "app.kubernetes.io/managed-by=promptfoo-controller";

async fn reconcile(
    config: Arc<PromptFooConfig>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ControllerError> {
    reconciler.reconcile_object(&config).await
}

/// Requeue a failed PromptFooConfig with per-object Fibonacci backoff
pub(crate) fn error_policy(
    config: Arc<PromptFooConfig>,
    error: &ControllerError,
    reconciler: Arc<Reconciler>,
) -> Action {
    let Some(key) = ObjectKey::from_resource(config.as_ref()) else {
        error!("Reconciliation error for unnamed PromptFooConfig: {}", error);
        return Action::requeue(Duration::from_secs(60));
    };

    reconciler.increment_error(&key);
    let (delay, error_count) = reconciler.get_backoff_for_resource(&key);
    error!(
        "Reconciliation error for PromptFooConfig {} (attempt {}), retrying in {}s: {}",
        key,
        error_count,
        delay.as_secs(),
        error
    );
    Action::requeue(delay)
}

/// Watches PromptFooConfigs and the children they own.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    prompt_config_api: Api<PromptFooConfig>,
    config_map_api: Api<ConfigMap>,
    cron_job_api: Api<CronJob>,
    runtime_config: RuntimeConfig,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        prompt_config_api: Api<PromptFooConfig>,
        config_map_api: Api<ConfigMap>,
        cron_job_api: Api<CronJob>,
        debounce: Duration,
        concurrency: u16,
    ) -> Self {
        Self {
            reconciler,
            prompt_config_api,
            config_map_api,
            cron_job_api,
            runtime_config: RuntimeConfig::default()
                .debounce(debounce)
                .concurrency(concurrency),
        }
    }

    /// List each watched kind once so a missing CRD or RBAC denial surfaces
    /// before the controller reports ready
    async fn verify_access(&self) -> Result<(), kube::Error> {
        let params = ListParams::default().limit(1);
        let children = params.clone().labels(MANAGED_CHILDREN_SELECTOR);

        self.prompt_config_api.list_metadata(&params).await?;
        self.config_map_api.list_metadata(&children).await?;
        self.cron_job_api.list_metadata(&children).await?;
        Ok(())
    }

    /// Run until the process receives SIGINT/SIGTERM.
    ///
    /// `probe` turns ready once every watched kind could be listed.
    pub async fn watch_prompt_configs(&self, probe: &ProbeState) -> Result<(), ControllerError> {
        info!("Starting PromptFooConfig watcher");

        server::ready_after(probe, self.verify_access()).await?;
        info!("PromptFooConfig, ConfigMap and CronJob APIs are reachable");

        let children = watcher::Config::default().labels(MANAGED_CHILDREN_SELECTOR);

        Controller::new(self.prompt_config_api.clone(), watcher::Config::default())
            .owns(self.config_map_api.clone(), children.clone())
            .owns(self.cron_job_api.clone(), children)
            .with_config(self.runtime_config.clone())
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|res| async move {
                match res {
                    Ok((obj, _action)) => debug!("Reconciled PromptFooConfig {}", obj),
                    Err(RuntimeError::ObjectNotFound(obj)) => {
                        debug!("PromptFooConfig {} is gone, skipping", obj);
                    }
                    Err(RuntimeError::ReconcilerFailed(e, obj)) => {
                        warn!("Reconciliation of PromptFooConfig {} failed: {}", obj, e);
                    }
                    Err(e) => error!("Controller error for PromptFooConfig: {}", e),
                }
            })
            .await;

        info!("PromptFooConfig watcher stopped");
        Ok(())
    }
}
