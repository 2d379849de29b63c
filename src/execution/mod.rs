//! Pipeline execution engine

pub mod backoff;
pub mod cell;
pub mod controller;
pub mod engine;
pub mod events;
pub mod executor;
pub mod report;
pub mod scheduler;

pub use backoff::PollPolicy;
pub use cell::StepCell;
pub use controller::ResourceStepController;
pub use engine::{EngineConfig, ExecutionEngine};
pub use events::{EventHandler, EventSink, ExecutionEvent};
pub use executor::StepExecutor;
pub use report::PipelineReport;
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
