//! Pipeline configuration from YAML

use crate::component::{ComponentRef, ImagePullPolicy};
use crate::core::condition::{Condition, FieldPath};
use crate::core::pipeline::{PipelineBuilder, PipelineGraph};
use crate::core::step::{InvocationSpec, ParameterValue, ResourceAction, ResourceSpec, Step};
use crate::execution::{EngineConfig, PollPolicy, SchedulingStrategy};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Pipeline parameters and their defaults
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,

    /// Pipeline steps
    pub steps: Vec<StepConfig>,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Step configuration as defined in YAML
///
/// Exactly one of `component` or `resource` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step name
    pub name: String,

    /// Steps that must succeed first
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub component: Option<ComponentRef>,

    #[serde(default)]
    pub image_pull_policy: Option<ImagePullPolicy>,

    #[serde(default)]
    pub arguments: IndexMap<String, ArgumentConfig>,

    #[serde(default)]
    pub resource: Option<ResourceConfig>,

    /// Timeout for this step (overrides the polling timeout for resources)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Resource step configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub action: ResourceAction,

    pub manifest: Value,

    #[serde(default)]
    pub success_condition: Option<String>,

    #[serde(default)]
    pub failure_condition: Option<String>,

    /// Output name -> field path in the observed resource
    #[serde(default)]
    pub attribute_outputs: IndexMap<String, String>,
}

/// Argument binding in YAML
///
/// `{ parameter: name }`, `{ from_step: train, output: name }` or any
/// other value taken literally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentConfig {
    Parameter {
        parameter: String,
    },
    StepOutput {
        from_step: String,
        #[serde(default)]
        output: Option<String>,
    },
    Literal(Value),
}

impl From<&ArgumentConfig> for ParameterValue {
    fn from(argument: &ArgumentConfig) -> Self {
        match argument {
            ArgumentConfig::Parameter { parameter } => {
                ParameterValue::PipelineParameter(parameter.clone())
            }
            ArgumentConfig::StepOutput { from_step, output } => ParameterValue::StepOutput {
                step: from_step.clone(),
                output: output.clone(),
            },
            ArgumentConfig::Literal(value) => ParameterValue::Literal(value.clone()),
        }
    }
}

/// Resource polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_initial_interval_ms() -> u64 {
    2_000
}

fn default_max_interval_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_timeout_secs() -> u64 {
    3_600
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl PollingConfig {
    pub fn to_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// How steps are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyName {
    Sequential,
    #[default]
    Parallel,
}

/// Execution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub strategy: StrategyName,

    /// Caps parallel execution when set
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Delete in-flight resources when the run is cancelled
    #[serde(default)]
    pub cleanup_on_cancel: bool,
}

impl ExecutionConfig {
    pub fn strategy(&self) -> SchedulingStrategy {
        match (self.strategy, self.max_parallel) {
            (StrategyName::Sequential, _) => SchedulingStrategy::Sequential,
            (StrategyName::Parallel, Some(limit)) => SchedulingStrategy::LimitedParallel(limit),
            (StrategyName::Parallel, None) => SchedulingStrategy::Parallel,
        }
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("invalid pipeline file {}", path.display()))
    }

    /// Parse pipeline configuration from a YAML string
    ///
    /// The configuration is validated by building its graph.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml).context("failed to parse pipeline YAML")?;
        config.to_graph()?;
        Ok(config)
    }

    /// Build the pipeline graph described by this configuration
    pub fn to_graph(&self) -> Result<PipelineGraph> {
        let mut builder = PipelineBuilder::new(&self.name);

        for (name, default) in &self.parameters {
            builder.add_parameter(name.clone(), default.clone())?;
        }

        for step_config in &self.steps {
            let step = step_config
                .to_step()
                .with_context(|| format!("invalid step '{}'", step_config.name))?;
            builder.add_step(step)?;
        }

        Ok(builder.finalize()?)
    }

    /// Engine settings from the `polling` and `execution` sections
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            strategy: self.execution.strategy(),
            poll: self.polling.to_policy(),
            cleanup_on_cancel: self.execution.cleanup_on_cancel,
        }
    }
}

impl StepConfig {
    fn to_step(&self) -> Result<Step> {
        let timeout = self.timeout_secs.map(Duration::from_secs);

        let mut step = match (&self.component, &self.resource) {
            (Some(component), None) => {
                let mut spec = InvocationSpec::new(component.clone());
                spec.image_pull_policy = self.image_pull_policy;
                spec.timeout = timeout;
                Step::invocation(&self.name, spec)
            }
            (None, Some(resource)) => Step::resource(&self.name, resource.to_spec(timeout)?),
            (Some(_), Some(_)) => anyhow::bail!("step sets both 'component' and 'resource'"),
            (None, None) => anyhow::bail!("step needs either 'component' or 'resource'"),
        };

        for dependency in &self.depends_on {
            step = step.after(dependency);
        }
        for (name, argument) in &self.arguments {
            step = step.with_parameter(name, argument.into());
        }

        Ok(step)
    }
}

impl ResourceConfig {
    fn to_spec(&self, timeout: Option<Duration>) -> Result<ResourceSpec> {
        let mut spec = ResourceSpec::new(self.action, self.manifest.clone());
        spec.timeout = timeout;

        if let Some(text) = &self.success_condition {
            let condition = Condition::parse(text)
                .with_context(|| format!("invalid success condition '{}'", text))?;
            spec = spec.with_success_condition(condition);
        }
        if let Some(text) = &self.failure_condition {
            let condition = Condition::parse(text)
                .with_context(|| format!("invalid failure condition '{}'", text))?;
            spec = spec.with_failure_condition(condition);
        }
        for (name, path) in &self.attribute_outputs {
            let path = FieldPath::parse(path)
                .with_context(|| format!("invalid path for output '{}'", name))?;
            spec = spec.with_attribute_output(name, path);
        }

        Ok(spec)
    }
}
