//! Main execution engine - orchestrates the entire pipeline run

use crate::component::ComponentInvoker;
use crate::core::{ExecutionStatus, FailureKind, PipelineContext, PipelineGraph, StepPhase, StepState};
use crate::execution::backoff::PollPolicy;
use crate::execution::cell::StepCell;
use crate::execution::events::{EventSink, ExecutionEvent};
use crate::execution::executor::StepExecutor;
use crate::execution::report::PipelineReport;
use crate::execution::scheduler::{ExecutionScheduler, SchedulingStrategy};
use crate::resource::ResourceManager;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Engine settings
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub strategy: SchedulingStrategy,
    pub poll: PollPolicy,
    /// Delete in-flight resources when the run is cancelled
    pub cleanup_on_cancel: bool,
}

/// Main pipeline execution engine
///
/// Each started step runs in its own tokio task; the engine loop only
/// schedules, skips and collects results.
pub struct ExecutionEngine<R, I> {
    scheduler: ExecutionScheduler,
    executor: Arc<StepExecutor<R, I>>,
    events: EventSink,
}

impl<R, I> ExecutionEngine<R, I>
where
    R: ResourceManager + 'static,
    I: ComponentInvoker + 'static,
{
    pub fn new(resources: Arc<R>, invoker: Arc<I>, config: EngineConfig) -> Self {
        let events = EventSink::new();
        let executor = StepExecutor::new(resources, invoker)
            .with_policy(config.poll)
            .with_cleanup_on_cancel(config.cleanup_on_cancel)
            .with_events(events.clone());

        Self {
            scheduler: ExecutionScheduler::new(config.strategy),
            executor: Arc::new(executor),
            events,
        }
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler).await;
    }

    /// Execute the pipeline with its default parameters
    pub async fn execute(&self, graph: &PipelineGraph, cancel: CancellationToken) -> PipelineReport {
        self.execute_with_parameters(graph, IndexMap::new(), cancel).await
    }

    /// Execute the pipeline, overriding some parameter defaults
    pub async fn execute_with_parameters(
        &self,
        graph: &PipelineGraph,
        overrides: IndexMap<String, Value>,
        cancel: CancellationToken,
    ) -> PipelineReport {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!("Starting pipeline execution: {} ({})", graph.name(), execution_id);
        self.events
            .emit(ExecutionEvent::PipelineStarted {
                execution_id,
                pipeline_name: graph.name().to_string(),
            })
            .await;

        let mut parameters = graph.parameters().clone();
        for (name, value) in overrides {
            if !parameters.contains_key(&name) {
                warn!("Ignoring override for undeclared parameter '{}'", name);
                continue;
            }
            parameters.insert(name, value);
        }
        let mut context = PipelineContext::new(parameters);

        let cells: IndexMap<String, Arc<StepCell>> = graph
            .execution_order()
            .iter()
            .map(|name| (name.clone(), Arc::new(StepCell::new(name.clone()))))
            .collect();
        let mut phases: IndexMap<String, StepPhase> = cells
            .keys()
            .map(|name| (name.clone(), StepPhase::Pending))
            .collect();

        let mut tasks: JoinSet<(String, StepState)> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
            }

            if !cancelled {
                for (name, reason) in self.scheduler.blocked_steps(graph, &phases) {
                    let skipped = StepState::Skipped {
                        reason: reason.clone(),
                    };
                    if cells[&name].transition(skipped).await {
                        info!("Skipping step {}: {}", name, reason);
                        phases.insert(name.clone(), StepPhase::Skipped);
                        self.events
                            .emit(ExecutionEvent::StepSkipped { step: name, reason })
                            .await;
                    }
                }

                for name in self.scheduler.next_steps(graph, &phases) {
                    let Some(step) = graph.step(&name).cloned() else {
                        continue;
                    };
                    let active = if step.is_resource() {
                        StepPhase::Submitting
                    } else {
                        StepPhase::Running
                    };
                    phases.insert(name.clone(), active);

                    self.events
                        .emit(ExecutionEvent::StepStarted { step: name.clone() })
                        .await;

                    let executor = self.executor.clone();
                    let context = context.clone();
                    let cell = cells[&name].clone();
                    let token = cancel.clone();

                    tasks.spawn(async move {
                        let step_cell = cell.clone();
                        let run = tokio::spawn(async move {
                            executor.execute(&step, &context, step_cell, token).await
                        });

                        let state = match run.await {
                            Ok(state) => state,
                            Err(e) => {
                                let state = StepState::failed(
                                    FailureKind::Internal,
                                    format!("step task aborted: {}", e),
                                );
                                if cell.transition(state.clone()).await {
                                    state
                                } else {
                                    cell.state().await
                                }
                            }
                        };
                        (name, state)
                    });
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, state))) => {
                        let phase = state.phase();
                        info!("Step {} finished: {}", name, phase);
                        if let Some(outputs) = state.outputs() {
                            context.set_step_output(&name, outputs.clone());
                        }
                        phases.insert(name.clone(), phase);
                        self.events
                            .emit(ExecutionEvent::StepFinished { step: name, phase })
                            .await;
                    }
                    Some(Err(e)) => error!("Step task failed to join: {}", e),
                    None => {}
                },
                _ = cancel.cancelled(), if !cancelled => {
                    warn!("Pipeline {} cancelled, waiting for running steps", graph.name());
                    cancelled = true;
                }
            }
        }

        let mut steps = IndexMap::new();
        for (name, cell) in &cells {
            if !cell.phase().await.is_terminal() {
                if cancelled {
                    cell.cancel("pipeline cancelled").await;
                } else {
                    error!("Step {} can never run", name);
                    cell.transition(StepState::Skipped {
                        reason: "no runnable path to this step".to_string(),
                    })
                    .await;
                }
            }
            steps.insert(name.clone(), cell.state().await);
        }

        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if steps.values().all(|s| s.phase() == StepPhase::Succeeded) {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };

        info!("Pipeline {} finished with status {:?}", graph.name(), status);
        self.events
            .emit(ExecutionEvent::PipelineCompleted { execution_id, status })
            .await;

        PipelineReport {
            execution_id,
            pipeline_name: graph.name().to_string(),
            status,
            started_at,
            completed_at: Utc::now(),
            steps,
        }
    }
}
