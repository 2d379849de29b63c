//! Step domain model

use crate::component::{ComponentRef, ImagePullPolicy};
use crate::core::condition::{Condition, FieldPath};
use crate::resource::ResourceHandle;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step name
    pub name: String,

    /// What the step does
    pub kind: StepKind,

    /// Steps that must succeed before this one starts
    pub dependencies: IndexSet<String>,

    /// Named inputs, in declaration order
    pub parameters: IndexMap<String, ParameterValue>,
}

/// Step variants
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Calls a pre-packaged component
    Invocation(InvocationSpec),
    /// Creates or mutates an externally managed resource
    Resource(ResourceSpec),
}

/// Value bound to a step parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// A fixed value
    Literal(Value),
    /// A pipeline-level parameter, resolved per run
    PipelineParameter(String),
    /// Output of an upstream step; `output: None` takes all outputs
    StepOutput { step: String, output: Option<String> },
}

impl ParameterValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParameterValue::Literal(value.into())
    }

    pub fn output_of(step: impl Into<String>, output: impl Into<String>) -> Self {
        ParameterValue::StepOutput {
            step: step.into(),
            output: Some(output.into()),
        }
    }
}

/// Invocation step settings
#[derive(Debug, Clone)]
pub struct InvocationSpec {
    pub component: ComponentRef,
    pub image_pull_policy: Option<ImagePullPolicy>,
    /// Maximum time the invocation may take
    pub timeout: Option<Duration>,
}

impl InvocationSpec {
    pub fn new(component: ComponentRef) -> Self {
        Self {
            component,
            image_pull_policy: None,
            timeout: None,
        }
    }

    pub fn with_image_pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.image_pull_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What a resource step does with its manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    #[default]
    Create,
    Delete,
    Apply,
}

/// Resource step settings
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    /// Opaque resource document, passed through to the resource manager
    pub manifest: Value,

    pub action: ResourceAction,

    pub success_condition: Option<Condition>,

    pub failure_condition: Option<Condition>,

    /// Overrides the engine's poll timeout
    pub timeout: Option<Duration>,

    /// Extra outputs read from the final observed document
    pub attribute_outputs: IndexMap<String, FieldPath>,
}

impl ResourceSpec {
    pub fn new(action: ResourceAction, manifest: Value) -> Self {
        Self {
            manifest,
            action,
            success_condition: None,
            failure_condition: None,
            timeout: None,
            attribute_outputs: IndexMap::new(),
        }
    }

    pub fn create(manifest: Value) -> Self {
        Self::new(ResourceAction::Create, manifest)
    }

    pub fn with_success_condition(mut self, condition: Condition) -> Self {
        self.success_condition = Some(condition);
        self
    }

    pub fn with_failure_condition(mut self, condition: Condition) -> Self {
        self.failure_condition = Some(condition);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_attribute_output(mut self, name: impl Into<String>, path: FieldPath) -> Self {
        self.attribute_outputs.insert(name.into(), path);
        self
    }

    /// Whether completion has to be observed by polling
    pub fn has_conditions(&self) -> bool {
        self.success_condition.is_some() || self.failure_condition.is_some()
    }

    /// Outputs published by a finished resource step
    ///
    /// Always contains `name` and `manifest` (the last observed document,
    /// or the submitted manifest when nothing was observed).
    pub fn outputs(&self, handle: &ResourceHandle, observed: Option<&Value>) -> Value {
        let document = observed.unwrap_or(&self.manifest);

        let mut outputs = Map::new();
        outputs.insert("name".to_string(), json!(handle.name));
        outputs.insert("manifest".to_string(), document.clone());
        for (name, path) in &self.attribute_outputs {
            let value = path.resolve(document).cloned().unwrap_or(Value::Null);
            outputs.insert(name.clone(), value);
        }
        Value::Object(outputs)
    }
}

impl Step {
    fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            dependencies: IndexSet::new(),
            parameters: IndexMap::new(),
        }
    }

    /// Create a step that calls a component
    pub fn invocation(name: impl Into<String>, spec: InvocationSpec) -> Self {
        Self::new(name, StepKind::Invocation(spec))
    }

    /// Create a step backed by a resource
    pub fn resource(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self::new(name, StepKind::Resource(spec))
    }

    /// Declare that this step runs after `step`
    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.dependencies.insert(step.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn is_resource(&self) -> bool {
        matches!(self.kind, StepKind::Resource(_))
    }

    pub fn resource_spec(&self) -> Option<&ResourceSpec> {
        match &self.kind {
            StepKind::Resource(spec) => Some(spec),
            StepKind::Invocation(_) => None,
        }
    }

    /// `(parameter, upstream step)` pairs for every output reference
    pub fn upstream_references(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters.iter().filter_map(|(name, value)| match value {
            ParameterValue::StepOutput { step, .. } => Some((name.as_str(), step.as_str())),
            _ => None,
        })
    }

    /// `(parameter, pipeline parameter)` pairs
    pub fn pipeline_parameter_references(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters.iter().filter_map(|(name, value)| match value {
            ParameterValue::PipelineParameter(p) => Some((name.as_str(), p.as_str())),
            _ => None,
        })
    }

    /// Check if all dependencies are in `succeeded`
    pub fn dependencies_satisfied(&self, mut succeeded: impl FnMut(&str) -> bool) -> bool {
        self.dependencies.iter().all(|dep| succeeded(dep.as_str()))
    }
}
