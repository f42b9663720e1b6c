//! CronJob projection: the scheduled promptfoo evaluation

use super::config_map::PROMPT_CONFIG_KEY;
use super::{Reconciler, child_metadata, child_name, drift_hook, enforce_metadata};
use crate::config::JobTemplateConfig;
use crate::error::ControllerError;
use crds::PromptFooConfig;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, KeyToPath, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use kube::ResourceExt;
use kube_store::OperationResult;
use tracing::{debug, info};

/// Directory the prompt ConfigMap is mounted at
pub const PROMPT_MOUNT_PATH: &str = "/prompt";

/// Environment variable carrying the OpenAI credential
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

const RESTART_POLICY: &str = "Never";

const CHILD: &str = "CronJob";

/// CronJob that should exist for `config`, running `template`
pub fn desired_cron_job(
    config: &PromptFooConfig,
    template: &JobTemplateConfig,
) -> Result<CronJob, ControllerError> {
    let metadata = child_metadata(config, CHILD)?;
    let name = child_name(&config.name_any());

    let container = Container {
        name: name.clone(),
        image: Some(template.image.clone()),
        command: Some(template.command.clone()),
        env: Some(vec![EnvVar {
            name: OPENAI_API_KEY_ENV.to_string(),
            // the API server drops empty values
            value: Some(config.spec.open_ai_api_key.clone()).filter(|key| !key.is_empty()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: name.clone(),
            mount_path: PROMPT_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let volume = Volume {
        name: name.clone(),
        config_map: Some(ConfigMapVolumeSource {
            name: name.clone(),
            items: Some(vec![KeyToPath {
                key: PROMPT_CONFIG_KEY.to_string(),
                path: PROMPT_CONFIG_KEY.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(CronJob {
        metadata,
        spec: Some(CronJobSpec {
            schedule: config.spec.schedule.clone(),
            job_template: JobTemplateSpec {
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        spec: Some(PodSpec {
                            containers: vec![container],
                            restart_policy: Some(RESTART_POLICY.to_string()),
                            volumes: Some(vec![volume]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Overwrite the fields this controller owns on a live CronJob.
///
/// Fields the API server defaults (concurrency policy, history limits,
/// termination message settings and the like) are left alone so an enforced
/// pass over an unchanged PromptFooConfig stays a no-op.
pub(crate) fn enforce_cron_job(live: &mut CronJob, desired: &CronJob) {
    enforce_metadata(&mut live.metadata, &desired.metadata);

    let Some(desired_spec) = desired.spec.as_ref() else {
        return;
    };
    let live_spec = live.spec.get_or_insert_with(Default::default);
    live_spec.schedule.clone_from(&desired_spec.schedule);

    let desired_pod = desired_spec
        .job_template
        .spec
        .as_ref()
        .and_then(|job| job.template.spec.as_ref());
    let Some(desired_pod) = desired_pod else {
        return;
    };
    let live_pod = live_spec
        .job_template
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default);

    live_pod.restart_policy.clone_from(&desired_pod.restart_policy);

    for wanted in &desired_pod.containers {
        match live_pod.containers.iter_mut().find(|c| c.name == wanted.name) {
            Some(container) => {
                container.image.clone_from(&wanted.image);
                container.command.clone_from(&wanted.command);
                container.env.clone_from(&wanted.env);
                container.volume_mounts.clone_from(&wanted.volume_mounts);
            }
            None => live_pod.containers.push(wanted.clone()),
        }
    }

    for wanted in desired_pod.volumes.iter().flatten() {
        let volumes = live_pod.volumes.get_or_insert_with(Vec::new);
        match volumes.iter_mut().find(|v| v.name == wanted.name) {
            Some(volume) => match (volume.config_map.as_mut(), wanted.config_map.as_ref()) {
                (Some(live_source), Some(wanted_source)) => {
                    live_source.name.clone_from(&wanted_source.name);
                    live_source.items.clone_from(&wanted_source.items);
                }
                _ => volume.clone_from(wanted),
            },
            None => volumes.push(wanted.clone()),
        }
    }
}

impl Reconciler {
    /// Create the CronJob of `config` if absent, or hand the live one to the drift hook
    pub async fn reconcile_cron_job(
        &self,
        config: &PromptFooConfig,
    ) -> Result<OperationResult, ControllerError> {
        let desired = desired_cron_job(config, &self.job_template)?;
        let name = child_name(&config.name_any());

        let enforced = desired.clone();
        let hook = drift_hook(self.drift_policy, move |live: &mut CronJob| {
            enforce_cron_job(live, &enforced);
        });

        let result = self
            .with_deadline(
                "create or update CronJob",
                self.store.create_or_update_cron_job(desired, &*hook),
            )
            .await?
            .map_err(|source| ControllerError::Store {
                child: CHILD,
                operation: "create or update",
                source,
            })?;

        self.record_child_operation(CHILD, result);
        match result {
            OperationResult::Unchanged => debug!("CronJob {} is up to date", name),
            _ => info!("CronJob {} {}", name, result),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_prompt_config;

    fn pod_spec(cron_job: &CronJob) -> &PodSpec {
        cron_job
            .spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|j| j.template.spec.as_ref())
            .unwrap()
    }

    #[test]
    fn test_desired_cron_job() {
        let mut config = create_test_prompt_config("nightly", "evals", &[], "*/5 * * * *");
        config.spec.open_ai_api_key = "sk-test".to_string();

        let cj = desired_cron_job(&config, &JobTemplateConfig::default()).unwrap();

        assert_eq!(cj.metadata.name.as_deref(), Some("promptfoo-nightly"));
        assert_eq!(cj.metadata.namespace.as_deref(), Some("evals"));
        assert_eq!(cj.spec.as_ref().unwrap().schedule, "*/5 * * * *");

        let pod = pod_spec(&cj);
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.containers.len(), 1);

        let container = &pod.containers[0];
        assert_eq!(container.name, "promptfoo-nightly");
        assert_eq!(container.image.as_deref(), Some("node:20"));
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[..2], ["sh".to_string(), "-c".to_string()]);
        assert!(command[2].contains("cp /prompt/promptfooconfig.yaml promptfooconfig.yaml"));

        let env = container.env.as_ref().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, "OPENAI_API_KEY");
        assert_eq!(env[0].value.as_deref(), Some("sk-test"));

        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].name, "promptfoo-nightly");
        assert_eq!(mounts[0].mount_path, "/prompt");
        assert_eq!(mounts[0].read_only, None);

        let volumes = pod.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        let source = volumes[0].config_map.as_ref().unwrap();
        assert_eq!(source.name, "promptfoo-nightly");
        let items = source.items.as_ref().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "promptfooconfig.yaml");
        assert_eq!(items[0].path, "promptfooconfig.yaml");
    }

    #[test]
    fn test_desired_cron_job_omits_empty_api_key() {
        let mut config = create_test_prompt_config("nightly", "evals", &[], "*/5 * * * *");
        config.spec.open_ai_api_key = String::new();

        let cj = desired_cron_job(&config, &JobTemplateConfig::default()).unwrap();
        let env = pod_spec(&cj).containers[0].env.clone().unwrap();

        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, "OPENAI_API_KEY");
        assert_eq!(env[0].value, None);
    }

    #[test]
    fn test_desired_cron_job_uses_job_template() {
        let config = create_test_prompt_config("nightly", "evals", &[], "0 3 * * *");
        let template = JobTemplateConfig {
            image: "ghcr.io/acme/promptfoo:1.2".to_string(),
            command: vec!["promptfoo".to_string(), "eval".to_string()],
        };

        let cj = desired_cron_job(&config, &template).unwrap();
        let container = &pod_spec(&cj).containers[0];

        assert_eq!(container.image.as_deref(), Some("ghcr.io/acme/promptfoo:1.2"));
        assert_eq!(container.command, Some(template.command));
    }

    #[test]
    fn test_enforce_keeps_server_defaults() {
        let config = create_test_prompt_config("nightly", "evals", &[], "*/5 * * * *");
        let desired = desired_cron_job(&config, &JobTemplateConfig::default()).unwrap();

        let mut live = desired.clone();
        {
            let spec = live.spec.as_mut().unwrap();
            spec.schedule = "0 0 * * *".to_string();
            spec.concurrency_policy = Some("Allow".to_string());
            let pod = spec
                .job_template
                .spec
                .as_mut()
                .and_then(|j| j.template.spec.as_mut())
                .unwrap();
            pod.dns_policy = Some("ClusterFirst".to_string());
            pod.containers[0].image = Some("busybox".to_string());
            pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
        }

        enforce_cron_job(&mut live, &desired);

        let spec = live.spec.as_ref().unwrap();
        assert_eq!(spec.schedule, "*/5 * * * *");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Allow"));
        let pod = pod_spec(&live);
        assert_eq!(pod.dns_policy.as_deref(), Some("ClusterFirst"));
        assert_eq!(pod.containers[0].image.as_deref(), Some("node:20"));
        assert_eq!(
            pod.containers[0].termination_message_path.as_deref(),
            Some("/dev/termination-log")
        );
    }
}
