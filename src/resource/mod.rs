//! Resource manager seam - the control plane resource steps talk to

pub mod error;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use error::{RejectionReason, ResourceError};
pub use memory::InMemoryResourceManager;

/// Identifies a resource created through a [`ResourceManager`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Resource kind (e.g. `Job`)
    pub kind: Option<String>,

    /// Resource name as assigned by the manager
    pub name: String,

    pub namespace: Option<String>,
}

impl ResourceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            kind: None,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Build a handle from `kind` and `metadata.{name,namespace}` of a manifest
    ///
    /// Returns `None` when the manifest carries no concrete name.
    pub fn from_manifest(manifest: &Value) -> Option<Self> {
        let metadata = manifest.get("metadata")?;
        let name = metadata.get("name")?.as_str()?;

        let mut handle = ResourceHandle::new(name);
        if let Some(kind) = manifest.get("kind").and_then(Value::as_str) {
            handle = handle.with_kind(kind);
        }
        if let Some(namespace) = metadata.get("namespace").and_then(Value::as_str) {
            handle = handle.with_namespace(namespace);
        }
        Some(handle)
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "{}/", kind)?;
        }
        if let Some(namespace) = &self.namespace {
            write!(f, "{}/", namespace)?;
        }
        write!(f, "{}", self.name)
    }
}

/// Trait for the external resource manager (e.g. a cluster API server)
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Submit a manifest; returns once the manager acknowledged it
    async fn create(&self, manifest: &Value) -> Result<ResourceHandle, ResourceError>;

    /// Create-or-update a manifest
    async fn apply(&self, manifest: &Value) -> Result<ResourceHandle, ResourceError> {
        self.create(manifest).await
    }

    /// Read the current document of a resource, status included
    async fn get_status(&self, handle: &ResourceHandle) -> Result<Value, ResourceError>;

    /// Remove a resource
    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ResourceError>;
}
