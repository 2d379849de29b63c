//! Step executor - runs individual steps against the collaborators

use crate::component::{ComponentInvoker, InvocationRequest};
use crate::core::{FailureKind, InvocationSpec, PipelineContext, Step, StepKind, StepState};
use crate::execution::backoff::PollPolicy;
use crate::execution::cell::StepCell;
use crate::execution::controller::ResourceStepController;
use crate::execution::events::EventSink;
use crate::resource::ResourceManager;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Executes a single step
pub struct StepExecutor<R, I> {
    resources: Arc<R>,
    invoker: Arc<I>,
    policy: PollPolicy,
    cleanup_on_cancel: bool,
    events: EventSink,
}

impl<R: ResourceManager, I: ComponentInvoker> StepExecutor<R, I> {
    pub fn new(resources: Arc<R>, invoker: Arc<I>) -> Self {
        Self {
            resources,
            invoker,
            policy: PollPolicy::default(),
            cleanup_on_cancel: false,
            events: EventSink::new(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cleanup_on_cancel(mut self, cleanup: bool) -> Self {
        self.cleanup_on_cancel = cleanup;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Execute a step and return its terminal state
    ///
    /// The state is also written to `cell`; when a cancellation wins the
    /// race the returned state is the cell's.
    pub async fn execute(
        &self,
        step: &Step,
        context: &PipelineContext,
        cell: Arc<StepCell>,
        cancel: CancellationToken,
    ) -> StepState {
        info!("Executing step: {}", step.name);

        match &step.kind {
            StepKind::Resource(spec) => {
                let arguments = match context.resolve_parameters(step) {
                    Ok(arguments) => arguments,
                    Err(e) => {
                        error!("Could not resolve parameters for step {}: {}", step.name, e);
                        let started_at = Utc::now();
                        if !cell.transition(StepState::Submitting { started_at }).await {
                            return cell.state().await;
                        }
                        return finish(&cell, StepState::failed(FailureKind::Internal, e.to_string())).await;
                    }
                };

                ResourceStepController::new(spec.clone(), self.resources.clone(), self.policy, cell)
                    .with_arguments(arguments)
                    .with_cancellation(cancel)
                    .with_cleanup_on_cancel(self.cleanup_on_cancel)
                    .with_events(self.events.clone())
                    .run()
                    .await
            }
            StepKind::Invocation(spec) => self.invoke(step, spec, context, &cell, &cancel).await,
        }
    }

    async fn invoke(
        &self,
        step: &Step,
        spec: &InvocationSpec,
        context: &PipelineContext,
        cell: &StepCell,
        cancel: &CancellationToken,
    ) -> StepState {
        let started_at = Utc::now();
        if !cell.transition(StepState::Running { started_at }).await {
            return cell.state().await;
        }

        let arguments = match context.resolve_parameters(step) {
            Ok(arguments) => arguments,
            Err(e) => {
                error!("Could not resolve arguments for step {}: {}", step.name, e);
                return finish(cell, StepState::failed(FailureKind::Internal, e.to_string())).await;
            }
        };
        debug!(step = %step.name, component = %spec.component.name, ?arguments, "invoking component");

        let request = InvocationRequest {
            step: step.name.clone(),
            component: spec.component.clone(),
            arguments,
            image_pull_policy: spec.image_pull_policy,
        };

        let since = Instant::now();
        let call = async {
            match spec.timeout {
                Some(limit) => timeout(limit, self.invoker.invoke(request)).await.ok(),
                None => Some(self.invoker.invoke(request).await),
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Step {} cancelled during invocation", step.name);
                cell.cancel("pipeline cancelled").await;
                return cell.state().await;
            }
            result = call => result,
        };

        let state = match result {
            Some(Ok(outputs)) => {
                info!("Step {} completed successfully", step.name);
                StepState::Succeeded {
                    outputs,
                    started_at,
                    completed_at: Utc::now(),
                }
            }
            Some(Err(e)) => {
                error!("Invocation error for step {}: {}", step.name, e);
                StepState::failed(FailureKind::Invocation, e.to_string())
            }
            None => {
                let elapsed = since.elapsed();
                error!("Timeout for step {} after {:?}", step.name, elapsed);
                StepState::TimedOut {
                    elapsed,
                    polls: 0,
                    last_error: None,
                    timed_out_at: Utc::now(),
                }
            }
        };

        finish(cell, state).await
    }
}

async fn finish(cell: &StepCell, state: StepState) -> StepState {
    if cell.transition(state.clone()).await {
        state
    } else {
        cell.state().await
    }
}
