//! Execution events and their delivery to registered handlers

use crate::core::{ExecutionStatus, StepPhase, Verdict};
use crate::resource::ResourceHandle;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
    },
    StepStarted {
        step: String,
    },
    ResourceSubmitted {
        step: String,
        resource: ResourceHandle,
    },
    ResourcePolled {
        step: String,
        resource: ResourceHandle,
        polls: usize,
        verdict: Verdict,
    },
    StepFinished {
        step: String,
        phase: StepPhase,
    },
    StepSkipped {
        step: String,
        reason: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Shared list of handlers; cloning shares the list
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.write().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub async fn emit(&self, event: ExecutionEvent) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}
