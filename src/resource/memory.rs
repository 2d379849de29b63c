//! In-process resource manager with scripted status documents

use crate::resource::{RejectionReason, ResourceError, ResourceHandle, ResourceManager};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Script key applied to resources that have no script of their own
const ANY_RESOURCE: &str = "*";

/// In-memory resource manager (for testing or local dry runs)
///
/// Status reads replay a per-resource script of observations. The last
/// observation of a script repeats forever; resources without a script
/// report their stored manifest unchanged.
pub struct InMemoryResourceManager {
    resources: RwLock<IndexMap<String, ResourceHandle>>,
    manifests: RwLock<HashMap<String, Value>>,
    scripts: RwLock<HashMap<String, VecDeque<Result<Value, ResourceError>>>>,
    rejections: RwLock<HashMap<String, ResourceError>>,
    polls: RwLock<HashMap<String, usize>>,
    deleted: RwLock<Vec<ResourceHandle>>,
    poll_latency: Option<Duration>,
    submit_latency: Option<Duration>,
}

impl InMemoryResourceManager {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(IndexMap::new()),
            manifests: RwLock::new(HashMap::new()),
            scripts: RwLock::new(HashMap::new()),
            rejections: RwLock::new(HashMap::new()),
            polls: RwLock::new(HashMap::new()),
            deleted: RwLock::new(Vec::new()),
            poll_latency: None,
            submit_latency: None,
        }
    }

    /// Delay every status read by `latency`
    pub fn with_poll_latency(mut self, latency: Duration) -> Self {
        self.poll_latency = Some(latency);
        self
    }

    /// Delay every create and apply by `latency`
    pub fn with_submit_latency(mut self, latency: Duration) -> Self {
        self.submit_latency = Some(latency);
        self
    }

    /// Script the observations returned for the resource named `name`
    pub async fn script_status(&self, name: &str, observations: Vec<Result<Value, ResourceError>>) {
        self.scripts
            .write()
            .await
            .insert(name.to_string(), observations.into_iter().collect());
    }

    /// Script the observations returned for any resource without its own script
    pub async fn script_default_status(&self, observations: Vec<Result<Value, ResourceError>>) {
        self.script_status(ANY_RESOURCE, observations).await;
    }

    /// Reject the next creation of a resource named `name`
    pub async fn reject_creation(&self, name: &str, reason: RejectionReason, message: &str) {
        self.rejections
            .write()
            .await
            .insert(name.to_string(), ResourceError::rejected(reason, message));
    }

    /// Handles of all live resources, in creation order
    pub async fn resources(&self) -> Vec<ResourceHandle> {
        self.resources.read().await.values().cloned().collect()
    }

    /// Whether a live resource named `name` exists
    pub async fn contains(&self, name: &str) -> bool {
        self.resources.read().await.contains_key(name)
    }

    /// Number of status reads issued for `name`
    pub async fn poll_count(&self, name: &str) -> usize {
        self.polls.read().await.get(name).copied().unwrap_or(0)
    }

    /// Handles removed through [`ResourceManager::delete`]
    pub async fn deleted(&self) -> Vec<ResourceHandle> {
        self.deleted.read().await.clone()
    }

    fn resolve_name(manifest: &Value) -> Result<String, ResourceError> {
        let metadata = manifest.get("metadata").ok_or_else(|| {
            ResourceError::rejected(RejectionReason::InvalidManifest, "manifest has no metadata")
        })?;

        if let Some(name) = metadata.get("name").and_then(Value::as_str) {
            return Ok(name.to_string());
        }

        if let Some(prefix) = metadata.get("generateName").and_then(Value::as_str) {
            let suffix = Uuid::new_v4().simple().to_string();
            return Ok(format!("{}{}", prefix, &suffix[..5]));
        }

        Err(ResourceError::rejected(
            RejectionReason::InvalidManifest,
            "metadata.name or metadata.generateName is required",
        ))
    }

    async fn store(&self, manifest: &Value, replace: bool) -> Result<ResourceHandle, ResourceError> {
        if let Some(latency) = self.submit_latency {
            tokio::time::sleep(latency).await;
        }

        let name = Self::resolve_name(manifest)?;

        if let Some(rejection) = self.rejections.write().await.remove(&name) {
            return Err(rejection);
        }

        let mut resources = self.resources.write().await;
        if resources.contains_key(&name) && !replace {
            return Err(ResourceError::rejected(
                RejectionReason::AlreadyExists,
                format!("resource '{}' already exists", name),
            ));
        }

        let mut handle = ResourceHandle::new(&name);
        if let Some(kind) = manifest.get("kind").and_then(Value::as_str) {
            handle = handle.with_kind(kind);
        }
        if let Some(namespace) = manifest
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
        {
            handle = handle.with_namespace(namespace);
        }

        resources.insert(name.clone(), handle.clone());
        self.manifests.write().await.insert(name, manifest.clone());
        Ok(handle)
    }
}

impl Default for InMemoryResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceManager for InMemoryResourceManager {
    async fn create(&self, manifest: &Value) -> Result<ResourceHandle, ResourceError> {
        self.store(manifest, false).await
    }

    async fn apply(&self, manifest: &Value) -> Result<ResourceHandle, ResourceError> {
        self.store(manifest, true).await
    }

    async fn get_status(&self, handle: &ResourceHandle) -> Result<Value, ResourceError> {
        if let Some(latency) = self.poll_latency {
            tokio::time::sleep(latency).await;
        }

        *self.polls.write().await.entry(handle.name.clone()).or_insert(0) += 1;

        if !self.resources.read().await.contains_key(&handle.name) {
            return Err(ResourceError::NotFound(handle.name.clone()));
        }

        let mut scripts = self.scripts.write().await;
        let key = if scripts.contains_key(&handle.name) {
            handle.name.as_str()
        } else {
            ANY_RESOURCE
        };

        if let Some(script) = scripts.get_mut(key) {
            let observation = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            if let Some(observation) = observation {
                return observation;
            }
        }

        let manifests = self.manifests.read().await;
        Ok(manifests.get(&handle.name).cloned().unwrap_or(Value::Null))
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ResourceError> {
        if self.resources.write().await.shift_remove(&handle.name).is_none() {
            return Err(ResourceError::Deletion {
                name: handle.name.clone(),
                message: "no such resource".to_string(),
            });
        }
        self.manifests.write().await.remove(&handle.name);
        self.deleted.write().await.push(handle.clone());
        Ok(())
    }
}
