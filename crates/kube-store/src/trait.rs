//! ObjectStore trait for mocking
//!
//! The reconciler only talks to the cluster through this trait. `KubeStore`
//! implements it on top of `kube::Api`; tests use `MockObjectStore`.

use crate::error::StoreError;
use crate::models::{Mutation, ObjectKey, OperationResult};
use crds::PromptFooConfig;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;

/// Trait for the object store operations used by the controller
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a PromptFooConfig, `Ok(None)` when it does not exist
    async fn get_prompt_config(&self, key: &ObjectKey) -> Result<Option<PromptFooConfig>, StoreError>;

    /// Create the ConfigMap if absent, otherwise apply `mutate` to the live
    /// object and replace it when that changed anything
    async fn create_or_update_config_map(
        &self,
        desired: ConfigMap,
        mutate: &Mutation<ConfigMap>,
    ) -> Result<OperationResult, StoreError>;

    /// Same as [`ObjectStore::create_or_update_config_map`] for CronJobs
    async fn create_or_update_cron_job(
        &self,
        desired: CronJob,
        mutate: &Mutation<CronJob>,
    ) -> Result<OperationResult, StoreError>;
}
