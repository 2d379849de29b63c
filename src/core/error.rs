//! Graph assembly errors

use thiserror::Error;

/// Problem found while finalizing a pipeline graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' parameter '{parameter}' reads output of unknown step '{upstream}'")]
    UnknownUpstream {
        step: String,
        parameter: String,
        upstream: String,
    },

    #[error("step '{step}' parameter '{parameter}' references undeclared pipeline parameter '{name}'")]
    UnknownPipelineParameter {
        step: String,
        parameter: String,
        name: String,
    },

    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Error types for pipeline graph assembly
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("a step or parameter named '{0}' already exists")]
    DuplicateName(String),

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("edge '{from}' -> '{to}' would close a cycle: {}", .path.join(" -> "))]
    Cycle {
        from: String,
        to: String,
        path: Vec<String>,
    },

    #[error("pipeline validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl GraphError {
    /// Issues carried by a validation error, empty for other kinds
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            GraphError::Validation(issues) => issues,
            _ => &[],
        }
    }
}
