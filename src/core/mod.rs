//! Core domain models for pipelines
//!
//! This module defines the step model, the graph builder, completion
//! conditions, step states and the YAML configuration layer.

pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;

pub use condition::{evaluate, Condition, ConditionParseError, FieldPath, Verdict};
pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
