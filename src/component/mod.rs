//! Component invoker seam for invocation steps

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reference to a pre-packaged component
///
/// The descriptor is resolved by whoever builds the pipeline; nothing in
/// this crate fetches or parses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Component name
    pub name: String,

    /// Where the descriptor was loaded from (informational)
    #[serde(default)]
    pub uri: Option<String>,

    /// Content digest of the resolved descriptor
    #[serde(default)]
    pub digest: Option<String>,
}

impl ComponentRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: None,
            digest: None,
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }
}

/// Image pull policy forwarded to the component runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    Always,
    IfNotPresent,
    Never,
}

/// A single component call
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Step issuing the call
    pub step: String,

    /// Component to run
    pub component: ComponentRef,

    /// Resolved arguments, in declaration order
    pub arguments: IndexMap<String, Value>,

    pub image_pull_policy: Option<ImagePullPolicy>,
}

/// Error types for component invocation
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("component '{component}' failed: {message}")]
    Failed { component: String, message: String },

    #[error("component '{0}' is unavailable")]
    Unavailable(String),
}

/// Trait for component invocation - allows for different implementations
#[async_trait]
pub trait ComponentInvoker: Send + Sync {
    /// Run a component and return its outputs
    async fn invoke(&self, request: InvocationRequest) -> Result<Value, InvocationError>;
}
