//! ConfigMap projection: the prompt payload read by the evaluation job

use super::{Reconciler, child_metadata, child_name, drift_hook, enforce_metadata};
use crate::error::ControllerError;
use crds::PromptFooConfig;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kube_store::OperationResult;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Key of the single ConfigMap entry, also the file name promptfoo reads
pub const PROMPT_CONFIG_KEY: &str = "promptfooconfig.yaml";

const CHILD: &str = "ConfigMap";

/// Render the prompt map as the YAML document stored in the ConfigMap.
///
/// Keys come out in sorted order; an empty prompt renders as `{}`.
pub fn render_prompt(prompt: &BTreeMap<String, String>) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(prompt)
}

/// ConfigMap that should exist for `config`
pub fn desired_config_map(config: &PromptFooConfig) -> Result<ConfigMap, ControllerError> {
    let metadata = child_metadata(config, CHILD)?;
    let payload = render_prompt(&config.spec.prompt)
        .map_err(|source| ControllerError::Serialization { child: CHILD, source })?;

    Ok(ConfigMap {
        metadata,
        data: Some(BTreeMap::from([(PROMPT_CONFIG_KEY.to_string(), payload)])),
        ..Default::default()
    })
}

impl Reconciler {
    /// Create the ConfigMap of `config` if absent, or hand the live one to the drift hook
    pub async fn reconcile_config_map(
        &self,
        config: &PromptFooConfig,
    ) -> Result<OperationResult, ControllerError> {
        let desired = desired_config_map(config)?;
        let name = child_name(&config.name_any());

        let enforced = desired.clone();
        let hook = drift_hook(self.drift_policy, move |live: &mut ConfigMap| {
            live.data.clone_from(&enforced.data);
            enforce_metadata(&mut live.metadata, &enforced.metadata);
        });

        let result = self
            .with_deadline(
                "create or update ConfigMap",
                self.store.create_or_update_config_map(desired, &*hook),
            )
            .await?
            .map_err(|source| ControllerError::Store {
                child: CHILD,
                operation: "create or update",
                source,
            })?;

        self.record_child_operation(CHILD, result);
        match result {
            OperationResult::Unchanged => debug!("ConfigMap {} is up to date", name),
            _ => info!("ConfigMap {} {}", name, result),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_prompt_config;

    #[test]
    fn test_render_prompt() {
        assert_eq!(render_prompt(&BTreeMap::new()).unwrap(), "{}\n");

        let prompt = BTreeMap::from([
            ("providers".to_string(), "echo".to_string()),
            ("description".to_string(), "smoke test".to_string()),
        ]);
        assert_eq!(
            render_prompt(&prompt).unwrap(),
            "description: smoke test\nproviders: echo\n"
        );
    }

    #[test]
    fn test_desired_config_map() {
        let config = create_test_prompt_config(
            "nightly",
            "evals",
            &[("anything", "ignored-key-structure")],
            "*/5 * * * *",
        );

        let cm = desired_config_map(&config).unwrap();

        assert_eq!(cm.metadata.name.as_deref(), Some("promptfoo-nightly"));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("evals"));
        let data = cm.data.unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[PROMPT_CONFIG_KEY], "anything: ignored-key-structure\n");

        let labels = cm.metadata.labels.unwrap();
        assert_eq!(labels["app.kubernetes.io/instance"], "nightly");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "promptfoo-controller");

        let owners = cm.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_desired_config_map_without_uid_fails() {
        let mut config = create_test_prompt_config("nightly", "evals", &[], "* * * * *");
        config.metadata.uid = None;

        assert!(matches!(
            desired_config_map(&config),
            Err(ControllerError::OwnerReference { child: "ConfigMap" })
        ));
    }
}
