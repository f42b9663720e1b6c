//! Object store backed by the Kubernetes API server

use crate::error::StoreError;
use crate::models::{Mutation, ObjectKey, OperationResult};
use crate::store_trait::ObjectStore;
use crds::PromptFooConfig;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Object store talking to the API server through `kube::Api`
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Creates a store using the given client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespace_of<K: Resource>(obj: &K) -> Result<String, StoreError> {
        obj.meta()
            .namespace
            .clone()
            .ok_or(StoreError::MissingField(".metadata.namespace"))
    }
}

/// Create-or-update against a namespaced API.
///
/// Replace carries the `resourceVersion` read from the live object, so a
/// concurrent writer makes the API server reject the update with 409.
async fn create_or_update<K>(
    api: &Api<K>,
    desired: K,
    mutate: &Mutation<K>,
) -> Result<OperationResult, StoreError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + PartialEq,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(StoreError::MissingField(".metadata.name"))?;

    match api.get_opt(&name).await? {
        None => {
            let mut obj = desired;
            mutate(&mut obj)?;
            match api.create(&PostParams::default(), &obj).await {
                Ok(_) => Ok(OperationResult::Created),
                Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::Conflict(format!(
                    "{} {} was created concurrently: {}",
                    K::kind(&()),
                    name,
                    ae.message
                ))),
                Err(e) => Err(e.into()),
            }
        }
        Some(existing) => {
            let mut obj = existing.clone();
            mutate(&mut obj)?;
            if obj == existing {
                debug!("{} {} is up to date", K::kind(&()), name);
                return Ok(OperationResult::Unchanged);
            }
            match api.replace(&name, &PostParams::default(), &obj).await {
                Ok(_) => Ok(OperationResult::Updated),
                Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::Conflict(format!(
                    "{} {} was modified concurrently: {}",
                    K::kind(&()),
                    name,
                    ae.message
                ))),
                Err(e) => Err(e.into()),
            }
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get_prompt_config(&self, key: &ObjectKey) -> Result<Option<PromptFooConfig>, StoreError> {
        let api: Api<PromptFooConfig> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create_or_update_config_map(
        &self,
        desired: ConfigMap,
        mutate: &Mutation<ConfigMap>,
    ) -> Result<OperationResult, StoreError> {
        let namespace = Self::namespace_of(&desired)?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
        create_or_update(&api, desired, mutate).await
    }

    async fn create_or_update_cron_job(
        &self,
        desired: CronJob,
        mutate: &Mutation<CronJob>,
    ) -> Result<OperationResult, StoreError> {
        let namespace = Self::namespace_of(&desired)?;
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &namespace);
        create_or_update(&api, desired, mutate).await
    }
}
