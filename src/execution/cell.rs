//! Per-step state holder shared between the engine and a running step

use crate::core::{StepPhase, StepState};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct StepRecord {
    state: StepState,
    history: Vec<StepPhase>,
}

/// Mutex-guarded state of one step
///
/// Every write goes through [`StepCell::transition`], which refuses edges
/// the step state machine does not allow. Terminal states are therefore
/// sticky even when a cancellation races an in-flight poll.
#[derive(Debug)]
pub struct StepCell {
    step: String,
    inner: Mutex<StepRecord>,
}

impl StepCell {
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            inner: Mutex::new(StepRecord {
                state: StepState::Pending,
                history: vec![StepPhase::Pending],
            }),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub async fn state(&self) -> StepState {
        self.inner.lock().await.state.clone()
    }

    pub async fn phase(&self) -> StepPhase {
        self.inner.lock().await.state.phase()
    }

    /// Every phase the step has passed through, in order
    pub async fn history(&self) -> Vec<StepPhase> {
        self.inner.lock().await.history.clone()
    }

    /// Move to `next` if the edge is allowed; returns whether it was applied
    pub async fn transition(&self, next: StepState) -> bool {
        let mut record = self.inner.lock().await;
        let from = record.state.phase();
        let to = next.phase();

        if !from.can_transition_to(to) {
            debug!(step = %self.step, %from, %to, "transition rejected");
            return false;
        }

        record.state = next;
        record.history.push(to);
        true
    }

    /// Mark the step cancelled unless it already finished
    pub async fn cancel(&self, reason: impl Into<String>) -> bool {
        self.transition(StepState::Cancelled {
            reason: reason.into(),
        })
        .await
    }
}
