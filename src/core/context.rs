//! Pipeline context - run parameters and upstream outputs

use crate::core::step::{ParameterValue, Step};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Error raised when a step parameter cannot be resolved
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("pipeline parameter '{0}' has no value")]
    MissingParameter(String),

    #[error("step '{0}' has not produced outputs")]
    MissingOutputs(String),

    #[error("step '{step}' has no output named '{output}'")]
    MissingOutput { step: String, output: String },
}

/// Execution context for a pipeline run
///
/// Holds the effective pipeline parameters and the outputs of completed steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Pipeline parameters (defaults merged with run overrides)
    pub parameters: IndexMap<String, Value>,

    /// Outputs from completed steps (step name -> outputs)
    pub step_outputs: HashMap<String, Value>,
}

impl PipelineContext {
    pub fn new(parameters: IndexMap<String, Value>) -> Self {
        Self {
            parameters,
            step_outputs: HashMap::new(),
        }
    }

    /// Set the outputs of a step
    pub fn set_step_output(&mut self, step: &str, outputs: Value) {
        self.step_outputs.insert(step.to_string(), outputs);
    }

    /// Get the outputs of a step
    pub fn get_step_output(&self, step: &str) -> Option<&Value> {
        self.step_outputs.get(step)
    }

    pub fn resolve(&self, value: &ParameterValue) -> Result<Value, ResolveError> {
        match value {
            ParameterValue::Literal(v) => Ok(v.clone()),
            ParameterValue::PipelineParameter(name) => self
                .parameters
                .get(name)
                .cloned()
                .ok_or_else(|| ResolveError::MissingParameter(name.clone())),
            ParameterValue::StepOutput { step, output } => {
                let outputs = self
                    .get_step_output(step)
                    .ok_or_else(|| ResolveError::MissingOutputs(step.clone()))?;
                match output {
                    None => Ok(outputs.clone()),
                    Some(key) => outputs.get(key).cloned().ok_or_else(|| {
                        ResolveError::MissingOutput {
                            step: step.clone(),
                            output: key.clone(),
                        }
                    }),
                }
            }
        }
    }

    /// Resolve every parameter of `step`, in declaration order
    pub fn resolve_parameters(&self, step: &Step) -> Result<IndexMap<String, Value>, ResolveError> {
        step.parameters
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.resolve(value)?)))
            .collect()
    }
}
