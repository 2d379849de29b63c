//! resource-pipeline - pipeline DAGs with resource-backed steps
//!
//! Steps either call an opaque component or create a cluster-style
//! resource and wait for it to reach a success or failure condition.

pub mod component;
pub mod core;
pub mod execution;
pub mod resource;

// Re-export commonly used types
pub use component::{ComponentInvoker, ComponentRef, InvocationError, InvocationRequest};
pub use core::config::PipelineConfig;
pub use core::{
    Condition, ExecutionStatus, GraphError, ParameterValue, PipelineBuilder, PipelineGraph, ResourceAction,
    ResourceSpec, Step, StepPhase, StepState,
};
pub use execution::{EngineConfig, ExecutionEngine, ExecutionEvent, PipelineReport, PollPolicy, SchedulingStrategy};
pub use resource::{InMemoryResourceManager, ResourceError, ResourceHandle, ResourceManager};
