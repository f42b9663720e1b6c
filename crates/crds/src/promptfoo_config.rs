//! PromptFooConfig CRD
//!
//! Declares a promptfoo evaluation: the prompt configuration to evaluate and
//! the cron schedule on which the evaluation runs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group of the PromptFooConfig CRD
pub const PROMPTFOO_API_GROUP: &str = "promptfoo.promptfoo.x-k8s.io";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "promptfoo.promptfoo.x-k8s.io",
    version = "v1",
    kind = "PromptFooConfig",
    shortname = "pfc",
    namespaced,
    status = "PromptFooConfigStatus",
    printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PromptFooConfigSpec {
    /// Prompt configuration handed to promptfoo.
    ///
    /// Rendered as YAML into the `promptfooconfig.yaml` file of the evaluation job.
    #[serde(default)]
    pub prompt: BTreeMap<String, String>,

    /// Cron expression driving the evaluation job (e.g. `"*/5 * * * *"`)
    #[serde(default)]
    pub schedule: String,

    /// OpenAI API key exposed to the evaluation container as `OPENAI_API_KEY`
    // Stored in plain text on the spec; moving it to a Secret reference changes the CRD contract.
    #[serde(default, rename = "openAIAPIKey")]
    pub open_ai_api_key: String,
}

/// Observed state of a PromptFooConfig.
///
/// Declared so the CRD carries a status subresource; the controller does not populate it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptFooConfigStatus {}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_uses_upstream_field_names() {
        let spec = PromptFooConfigSpec {
            prompt: BTreeMap::from([("prompts".to_string(), "Say hi".to_string())]),
            schedule: "0 * * * *".to_string(),
            open_ai_api_key: "sk-test".to_string(),
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["prompt"]["prompts"], "Say hi");
        assert_eq!(value["schedule"], "0 * * * *");
        assert_eq!(value["openAIAPIKey"], "sk-test");
    }

    #[test]
    fn test_spec_fields_default_when_missing() {
        let spec: PromptFooConfigSpec = serde_json::from_str("{}").unwrap();
        assert!(spec.prompt.is_empty());
        assert!(spec.schedule.is_empty());
        assert!(spec.open_ai_api_key.is_empty());
    }

    #[test]
    fn test_crd_metadata() {
        let crd = PromptFooConfig::crd();
        assert_eq!(crd.spec.group, PROMPTFOO_API_GROUP);
        assert_eq!(crd.spec.names.kind, "PromptFooConfig");
        assert_eq!(crd.spec.names.plural, "promptfooconfigs");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.short_names, Some(vec!["pfc".to_string()]));

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1");
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
