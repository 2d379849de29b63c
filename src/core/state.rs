//! Execution state models

use crate::resource::{RejectionReason, ResourceError, ResourceHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every step succeeded
    Completed,
    /// At least one step failed, timed out or was skipped
    Failed,
    /// Pipeline was cancelled
    Cancelled,
}

/// Category of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The resource manager refused the submission
    Creation(RejectionReason),
    /// A delete action could not remove its resource
    Deletion,
    /// The failure condition held on an observation
    Condition,
    /// The resource vanished while being awaited
    ResourceLost,
    /// The component call returned an error
    Invocation,
    /// Anything else (unresolved arguments, aborted tasks)
    Internal,
}

impl FailureKind {
    /// Classify an error returned while submitting a resource
    pub fn from_submission(error: &ResourceError) -> Self {
        match error {
            ResourceError::Creation { reason, .. } => FailureKind::Creation(*reason),
            ResourceError::Deletion { .. } => FailureKind::Deletion,
            _ => FailureKind::Creation(RejectionReason::Other),
        }
    }
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Waiting for dependencies
    Pending,
    /// Creation request in flight
    Submitting { started_at: DateTime<Utc> },
    /// Resource acknowledged, polling its status
    Awaiting {
        resource: ResourceHandle,
        polls: usize,
        started_at: DateTime<Utc>,
    },
    /// Component invocation in flight
    Running { started_at: DateTime<Utc> },
    /// Step completed successfully
    Succeeded {
        outputs: Value,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step finished badly
    Failed {
        kind: FailureKind,
        error: String,
        failed_at: DateTime<Utc>,
    },
    /// Step never finished within its time limit
    TimedOut {
        elapsed: Duration,
        polls: usize,
        last_error: Option<String>,
        timed_out_at: DateTime<Utc>,
    },
    /// Step was never attempted because an upstream step did not succeed
    Skipped { reason: String },
    /// Step was stopped by a pipeline cancellation
    Cancelled { reason: String },
}

impl StepState {
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        StepState::Failed {
            kind,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> StepPhase {
        match self {
            StepState::Pending => StepPhase::Pending,
            StepState::Submitting { .. } => StepPhase::Submitting,
            StepState::Awaiting { .. } => StepPhase::Awaiting,
            StepState::Running { .. } => StepPhase::Running,
            StepState::Succeeded { .. } => StepPhase::Succeeded,
            StepState::Failed { .. } => StepPhase::Failed,
            StepState::TimedOut { .. } => StepPhase::TimedOut,
            StepState::Skipped { .. } => StepPhase::Skipped,
            StepState::Cancelled { .. } => StepPhase::Cancelled,
        }
    }

    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Outputs of a succeeded step
    pub fn outputs(&self) -> Option<&Value> {
        match self {
            StepState::Succeeded { outputs, .. } => Some(outputs),
            _ => None,
        }
    }
}

/// Data-free discriminant of [`StepState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepPhase {
    Pending,
    Submitting,
    Awaiting,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
    Cancelled,
}

impl StepPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepPhase::Succeeded
                | StepPhase::Failed
                | StepPhase::TimedOut
                | StepPhase::Skipped
                | StepPhase::Cancelled
        )
    }

    /// Started but not yet finished
    pub fn is_active(self) -> bool {
        matches!(
            self,
            StepPhase::Submitting | StepPhase::Awaiting | StepPhase::Running
        )
    }

    /// Whether dependents of a step in this phase must be skipped
    pub fn blocks_dependents(self) -> bool {
        matches!(
            self,
            StepPhase::Failed | StepPhase::TimedOut | StepPhase::Skipped
        )
    }

    /// Allowed edges of the step state machine
    pub fn can_transition_to(self, next: StepPhase) -> bool {
        use StepPhase::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        match self {
            Pending => matches!(next, Submitting | Running | Skipped),
            Submitting => matches!(next, Awaiting | Succeeded | Failed),
            Awaiting => matches!(next, Awaiting | Succeeded | Failed | TimedOut),
            Running => matches!(next, Succeeded | Failed | TimedOut),
            Succeeded | Failed | TimedOut | Skipped | Cancelled => false,
        }
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepPhase::Pending => "pending",
            StepPhase::Submitting => "submitting",
            StepPhase::Awaiting => "awaiting",
            StepPhase::Running => "running",
            StepPhase::Succeeded => "succeeded",
            StepPhase::Failed => "failed",
            StepPhase::TimedOut => "timed out",
            StepPhase::Skipped => "skipped",
            StepPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
