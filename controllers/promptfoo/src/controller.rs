//! Main controller implementation.
//!
//! Wires the Kubernetes client, the object store, the reconciler, the
//! PromptFooConfig watcher and the probe server together, then runs until
//! the watcher stops or one of the tasks fails.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::server::{self, ProbeState};
use crate::watcher::Watcher;
use crds::PromptFooConfig;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use kube_store::{KubeStore, ObjectStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for PromptFooConfig resources.
#[derive(Debug)]
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

fn namespaced_or_all<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing PromptFoo Controller");

        let kube_client = Client::try_default().await?;

        let metrics = Metrics::new()?;
        let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(kube_client.clone()));
        let reconciler = Arc::new(Reconciler::new(store, &config, metrics));
        let probe_state = ProbeState::new(reconciler.metrics().clone());

        let ns = config.namespace.as_deref();
        let prompt_config_api: Api<PromptFooConfig> = namespaced_or_all(kube_client.clone(), ns);
        let config_map_api: Api<ConfigMap> = namespaced_or_all(kube_client.clone(), ns);
        let cron_job_api: Api<CronJob> = namespaced_or_all(kube_client, ns);

        let watcher_instance = Watcher::new(
            reconciler,
            prompt_config_api,
            config_map_api,
            cron_job_api,
            config.debounce,
            config.concurrency,
        );

        let probe_server = {
            let state = probe_state.clone();
            let addr = config.probe_addr;
            tokio::spawn(async move { server::serve(addr, state).await })
        };

        let watcher =
            tokio::spawn(async move { watcher_instance.watch_prompt_configs(&probe_state).await });

        Ok(Self {
            watcher,
            probe_server,
        })
    }

    /// Run until the watcher stops (on SIGINT/SIGTERM) or a task fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("PromptFoo Controller running");

        tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("PromptFooConfig watcher panicked: {e}")))??;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {e}")))??;
                return Err(ControllerError::Watch("Probe server stopped unexpectedly".to_string()));
            }
        }

        self.probe_server.abort();
        info!("PromptFoo Controller stopped");
        Ok(())
    }
}
