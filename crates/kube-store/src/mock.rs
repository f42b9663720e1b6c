//! Mock ObjectStore for unit testing
//!
//! Keeps objects in memory and behaves like the API server where the
//! reconciler can observe it: UIDs and resource versions are assigned on
//! write, zero values the server omits are dropped from stored CronJobs,
//! replaces with a stale resource version are rejected, and
//! `collect_garbage` removes children whose controlling owner is gone.
//! Failures and latency can be injected per operation.

use crate::error::StoreError;
use crate::models::{Mutation, ObjectKey, OperationResult};
use crate::store_trait::ObjectStore;
use crds::PromptFooConfig;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Resource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Store operations that can fail on demand or be observed in the write log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    /// `get_prompt_config`
    GetPromptConfig,
    /// ConfigMap create
    CreateConfigMap,
    /// ConfigMap replace
    ReplaceConfigMap,
    /// CronJob create
    CreateCronJob,
    /// CronJob replace
    ReplaceCronJob,
}

#[derive(Default)]
struct State {
    prompt_configs: HashMap<ObjectKey, PromptFooConfig>,
    config_maps: HashMap<ObjectKey, ConfigMap>,
    cron_jobs: HashMap<ObjectKey, CronJob>,
    failures: HashMap<MockOperation, String>,
    writes: Vec<(MockOperation, ObjectKey)>,
    latency: Option<Duration>,
    next_resource_version: u64,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }

    fn check_failure(&self, op: MockOperation) -> Result<(), StoreError> {
        match self.failures.get(&op) {
            Some(message) => Err(StoreError::Injected(message.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory ObjectStore
#[derive(Clone, Default)]
pub struct MockObjectStore {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockObjectStore").finish_non_exhaustive()
    }
}

impl MockObjectStore {
    /// Create an empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a PromptFooConfig (for test setup).
    ///
    /// Assigns a UID when the object has none and returns the stored copy.
    pub fn add_prompt_config(&self, mut config: PromptFooConfig) -> PromptFooConfig {
        let mut state = self.lock();
        if config.metadata.uid.is_none() {
            config.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        config.metadata.resource_version = Some(state.next_resource_version());
        let key = ObjectKey::new(
            config.metadata.namespace.clone().unwrap_or_default(),
            config.metadata.name.clone().unwrap_or_default(),
        );
        state.prompt_configs.insert(key, config.clone());
        config
    }

    /// Delete a PromptFooConfig. Children stay until `collect_garbage` runs.
    pub fn delete_prompt_config(&self, key: &ObjectKey) -> Option<PromptFooConfig> {
        self.lock().prompt_configs.remove(key)
    }

    /// Stored ConfigMap, if any
    #[must_use]
    pub fn config_map(&self, key: &ObjectKey) -> Option<ConfigMap> {
        self.lock().config_maps.get(key).cloned()
    }

    /// Stored CronJob, if any
    #[must_use]
    pub fn cron_job(&self, key: &ObjectKey) -> Option<CronJob> {
        self.lock().cron_jobs.get(key).cloned()
    }

    /// Number of stored ConfigMaps
    #[must_use]
    pub fn config_map_count(&self) -> usize {
        self.lock().config_maps.len()
    }

    /// Number of stored CronJobs
    #[must_use]
    pub fn cron_job_count(&self) -> usize {
        self.lock().cron_jobs.len()
    }

    /// Edit a stored ConfigMap the way another client would
    pub fn edit_config_map(&self, key: &ObjectKey, edit: impl FnOnce(&mut ConfigMap)) {
        let mut state = self.lock();
        let version = state.next_resource_version();
        if let Some(cm) = state.config_maps.get_mut(key) {
            edit(cm);
            cm.metadata.resource_version = Some(version);
        }
    }

    /// Edit a stored CronJob the way another client would
    pub fn edit_cron_job(&self, key: &ObjectKey, edit: impl FnOnce(&mut CronJob)) {
        let mut state = self.lock();
        let version = state.next_resource_version();
        if let Some(cj) = state.cron_jobs.get_mut(key) {
            edit(cj);
            cj.metadata.resource_version = Some(version);
        }
    }

    /// Make `op` fail with `message` until `clear_failures` is called
    pub fn fail_on(&self, op: MockOperation, message: impl Into<String>) {
        self.lock().failures.insert(op, message.into());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Writes performed so far, in order
    #[must_use]
    pub fn writes(&self) -> Vec<(MockOperation, ObjectKey)> {
        self.lock().writes.clone()
    }

    /// Number of writes performed so far
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Replace a stored ConfigMap as the API server would, enforcing the
    /// resource version carried by `cm`
    pub fn replace_config_map(&self, cm: ConfigMap) -> Result<(), StoreError> {
        let mut state = self.lock();
        let key = key_of(&cm)?;
        replace_checked(&mut state, |s| &mut s.config_maps, key, cm)
    }

    /// Emulate the cluster garbage collector: delete every child whose
    /// controller owner reference points at a PromptFooConfig that no longer
    /// exists. Returns the number of deleted objects.
    pub fn collect_garbage(&self) -> usize {
        let mut state = self.lock();
        let live: HashSet<String> = state
            .prompt_configs
            .values()
            .filter_map(|c| c.metadata.uid.clone())
            .collect();

        let before = state.config_maps.len() + state.cron_jobs.len();
        state.config_maps.retain(|_, cm| is_owner_alive(cm, &live));
        state.cron_jobs.retain(|_, cj| is_owner_alive(cj, &live));
        before - (state.config_maps.len() + state.cron_jobs.len())
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn upsert<K, F>(
        &self,
        select: F,
        ops: (MockOperation, MockOperation),
        normalize: fn(&mut K),
        desired: K,
        mutate: &Mutation<K>,
    ) -> Result<OperationResult, StoreError>
    where
        K: Resource + Clone + PartialEq,
        F: Fn(&mut State) -> &mut HashMap<ObjectKey, K>,
    {
        let (create_op, replace_op) = ops;
        let mut guard = self.lock();
        let state: &mut State = &mut guard;
        let key = key_of(&desired)?;

        let existing = select(state).get(&key).cloned();
        match existing {
            None => {
                state.check_failure(create_op)?;
                let mut obj = desired;
                mutate(&mut obj)?;
                normalize(&mut obj);
                obj.meta_mut().uid = Some(uuid::Uuid::new_v4().to_string());
                obj.meta_mut().resource_version = Some(state.next_resource_version());
                select(state).insert(key.clone(), obj);
                state.writes.push((create_op, key));
                Ok(OperationResult::Created)
            }
            Some(existing) => {
                let mut obj = existing.clone();
                mutate(&mut obj)?;
                if obj == existing {
                    return Ok(OperationResult::Unchanged);
                }
                state.check_failure(replace_op)?;
                normalize(&mut obj);
                replace_checked(state, select, key.clone(), obj)?;
                state.writes.push((replace_op, key));
                Ok(OperationResult::Updated)
            }
        }
    }
}

fn key_of<K: Resource>(obj: &K) -> Result<ObjectKey, StoreError> {
    let meta = obj.meta();
    let name = meta.name.clone().ok_or(StoreError::MissingField(".metadata.name"))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or(StoreError::MissingField(".metadata.namespace"))?;
    Ok(ObjectKey::new(namespace, name))
}

fn replace_checked<K, F>(state: &mut State, select: F, key: ObjectKey, mut obj: K) -> Result<(), StoreError>
where
    K: Resource,
    F: Fn(&mut State) -> &mut HashMap<ObjectKey, K>,
{
    let stored_version = select(state)
        .get(&key)
        .and_then(|o| o.meta().resource_version.clone());
    if stored_version.is_none() || obj.meta().resource_version != stored_version {
        return Err(StoreError::Conflict(format!(
            "{key} has resource version {stored_version:?}, write carried {:?}",
            obj.meta().resource_version
        )));
    }
    obj.meta_mut().resource_version = Some(state.next_resource_version());
    select(state).insert(key, obj);
    Ok(())
}

/// Drop the `omitempty` zero values the API server does not persist
fn normalize_cron_job(cron_job: &mut CronJob) {
    let pod = cron_job
        .spec
        .as_mut()
        .and_then(|spec| spec.job_template.spec.as_mut())
        .and_then(|job| job.template.spec.as_mut());
    let Some(pod) = pod else {
        return;
    };

    let containers = pod
        .containers
        .iter_mut()
        .chain(pod.init_containers.iter_mut().flatten());
    for container in containers {
        for env in container.env.iter_mut().flatten() {
            if env.value.as_deref() == Some("") {
                env.value = None;
            }
        }
        for mount in container.volume_mounts.iter_mut().flatten() {
            if mount.read_only == Some(false) {
                mount.read_only = None;
            }
        }
    }
}

fn is_owner_alive<K: Resource>(obj: &K, live: &HashSet<String>) -> bool {
    let controller = obj
        .meta()
        .owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true));
    match controller {
        Some(owner) => live.contains(&owner.uid),
        None => true,
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockObjectStore {
    async fn get_prompt_config(&self, key: &ObjectKey) -> Result<Option<PromptFooConfig>, StoreError> {
        self.simulate_latency().await;
        let state = self.lock();
        state.check_failure(MockOperation::GetPromptConfig)?;
        Ok(state.prompt_configs.get(key).cloned())
    }

    async fn create_or_update_config_map(
        &self,
        desired: ConfigMap,
        mutate: &Mutation<ConfigMap>,
    ) -> Result<OperationResult, StoreError> {
        self.simulate_latency().await;
        self.upsert(
            |s| &mut s.config_maps,
            (MockOperation::CreateConfigMap, MockOperation::ReplaceConfigMap),
            |_| {},
            desired,
            mutate,
        )
    }

    async fn create_or_update_cron_job(
        &self,
        desired: CronJob,
        mutate: &Mutation<CronJob>,
    ) -> Result<OperationResult, StoreError> {
        self.simulate_latency().await;
        self.upsert(
            |s| &mut s.cron_jobs,
            (MockOperation::CreateCronJob, MockOperation::ReplaceCronJob),
            normalize_cron_job,
            desired,
            mutate,
        )
    }
}
