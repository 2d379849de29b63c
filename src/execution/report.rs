//! Outcome of a pipeline run

use crate::core::{ExecutionStatus, StepPhase, StepState};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final state of every step of one run, keyed by step name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub execution_id: Uuid,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Steps in execution order
    pub steps: IndexMap<String, StepState>,
}

impl PipelineReport {
    fn in_phase(&self, phase: StepPhase) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|(_, state)| state.phase() == phase)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.in_phase(StepPhase::Succeeded)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.in_phase(StepPhase::Failed)
    }

    pub fn timed_out(&self) -> Vec<&str> {
        self.in_phase(StepPhase::TimedOut)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.in_phase(StepPhase::Skipped)
    }

    pub fn cancelled(&self) -> Vec<&str> {
        self.in_phase(StepPhase::Cancelled)
    }

    pub fn state(&self, step: &str) -> Option<&StepState> {
        self.steps.get(step)
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Fraction of steps that reached a terminal state
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 1.0;
        }
        let done = self.steps.values().filter(|s| s.is_terminal()).count();
        done as f64 / self.steps.len() as f64
    }
}
