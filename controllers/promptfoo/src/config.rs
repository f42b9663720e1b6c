//! Controller configuration.
//!
//! Everything is read from environment variables once at startup and then
//! passed by value into the components that need it.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Image running the evaluation when `PROMPTFOO_IMAGE` is not set
pub const DEFAULT_IMAGE: &str = "node:20";

/// Shell pipeline run by the evaluation container when `PROMPTFOO_COMMAND` is not set
pub const DEFAULT_SHELL_SCRIPT: &str = "npm install -g promptfoo && cp /prompt/promptfooconfig.yaml promptfooconfig.yaml && promptfoo eval --output output.json";

/// Container image and command of the evaluation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplateConfig {
    /// Container image
    pub image: String,
    /// Container command (entrypoint override)
    pub command: Vec<String>,
}

impl Default for JobTemplateConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), DEFAULT_SHELL_SCRIPT.to_string()],
        }
    }
}

/// What reconciliation does with children that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriftPolicy {
    /// Create missing children, never rewrite existing ones
    #[default]
    CreateOnly,
    /// Re-apply the desired fields onto existing children
    Enforce,
}

impl FromStr for DriftPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create-only" => Ok(DriftPolicy::CreateOnly),
            "enforce" => Ok(DriftPolicy::Enforce),
            other => Err(ControllerError::InvalidConfig(format!(
                "DRIFT_POLICY must be 'create-only' or 'enforce', got '{other}'"
            ))),
        }
    }
}

/// Runtime configuration of the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for all namespaces
    pub namespace: Option<String>,
    /// Evaluation job image and command
    pub job_template: JobTemplateConfig,
    /// Drift handling for existing children
    pub drift_policy: DriftPolicy,
    /// Deadline applied to every store call
    pub store_timeout: Duration,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
    /// Debounce between an event and its reconciliation
    pub debounce: Duration,
    /// Listen address of the probe/metrics server
    pub probe_addr: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            job_template: JobTemplateConfig::default(),
            drift_policy: DriftPolicy::default(),
            store_timeout: Duration::from_secs(30),
            concurrency: 3,
            debounce: Duration::from_secs(1),
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        let image = lookup("PROMPTFOO_IMAGE").unwrap_or(defaults.job_template.image);
        let command = match lookup("PROMPTFOO_COMMAND") {
            Some(raw) => {
                let command: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
                    ControllerError::InvalidConfig(format!(
                        "PROMPTFOO_COMMAND must be a JSON array of strings: {e}"
                    ))
                })?;
                if command.is_empty() {
                    return Err(ControllerError::InvalidConfig(
                        "PROMPTFOO_COMMAND must not be empty".to_string(),
                    ));
                }
                command
            }
            None => defaults.job_template.command,
        };

        let drift_policy = match lookup("DRIFT_POLICY") {
            Some(raw) => raw.parse()?,
            None => defaults.drift_policy,
        };

        let store_timeout = match lookup("STORE_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("STORE_TIMEOUT_SECS", &raw)?),
            None => defaults.store_timeout,
        };
        if store_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "STORE_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let concurrency = match lookup("RECONCILE_CONCURRENCY") {
            Some(raw) => parse_number("RECONCILE_CONCURRENCY", &raw)?,
            None => defaults.concurrency,
        };

        let debounce = match lookup("RECONCILE_DEBOUNCE_SECS") {
            Some(raw) => Duration::from_secs(parse_number("RECONCILE_DEBOUNCE_SECS", &raw)?),
            None => defaults.debounce,
        };

        let probe_addr = match lookup("PROBE_ADDR") {
            Some(raw) => raw.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("PROBE_ADDR '{raw}' is not a socket address: {e}"))
            })?,
            None => defaults.probe_addr,
        };

        Ok(Self {
            namespace,
            job_template: JobTemplateConfig { image, command },
            drift_policy,
            store_timeout,
            concurrency,
            debounce,
            probe_addr,
        })
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{key} '{raw}' is not a valid number: {e}")))
}
