//! Resource manager error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a resource manager refused a creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// The manifest is malformed or incomplete
    InvalidManifest,
    /// The caller may not create this resource
    PermissionDenied,
    /// A resource with the same name already exists
    AlreadyExists,
    Other,
}

/// Error types for resource operations
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("creation rejected ({reason:?}): {message}")]
    Creation {
        reason: RejectionReason,
        message: String,
    },

    #[error("resource '{0}' not found")]
    NotFound(String),

    #[error("transient status read error: {0}")]
    Transient(String),

    #[error("failed to delete resource '{name}': {message}")]
    Deletion { name: String, message: String },
}

impl ResourceError {
    pub fn rejected(reason: RejectionReason, message: impl Into<String>) -> Self {
        ResourceError::Creation {
            reason,
            message: message.into(),
        }
    }

    /// Whether a status read should simply be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, ResourceError::Transient(_))
    }
}
