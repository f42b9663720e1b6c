//! PromptFoo Controller
//!
//! Projects every `PromptFooConfig` custom resource into:
//! - a ConfigMap holding the prompt as `promptfooconfig.yaml`
//! - a CronJob running `promptfoo eval` against it on the configured schedule
//!
//! Both children are owned by the PromptFooConfig and are garbage-collected with it.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod server;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn")),
        )
        .init();

    // kube's rustls-tls feature needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting PromptFoo Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Image: {}", config.job_template.image);
    info!("  Drift policy: {:?}", config.drift_policy);
    info!("  Store timeout: {:?}", config.store_timeout);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
