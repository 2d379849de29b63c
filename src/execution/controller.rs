//! Resource step controller - submit a resource, then await its completion

use crate::core::{evaluate, FailureKind, ResourceAction, ResourceSpec, StepPhase, StepState, Verdict};
use crate::execution::backoff::PollPolicy;
use crate::execution::cell::StepCell;
use crate::execution::events::{EventSink, ExecutionEvent};
use crate::resource::{RejectionReason, ResourceError, ResourceHandle, ResourceManager};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline used when the configured timeout does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Drives one resource step from submission to a terminal state
///
/// The protocol is: submit the manifest, then poll the resource and
/// evaluate the step's conditions until one of them decides, the timeout
/// elapses or the run is cancelled. Polls sleep on the tokio timer, so a
/// waiting controller never holds up other steps.
pub struct ResourceStepController<R> {
    step: String,
    spec: ResourceSpec,
    resources: Arc<R>,
    policy: PollPolicy,
    cell: Arc<StepCell>,
    cancel: CancellationToken,
    cleanup_on_cancel: bool,
    events: EventSink,
    arguments: IndexMap<String, Value>,
}

impl<R: ResourceManager> ResourceStepController<R> {
    pub fn new(spec: ResourceSpec, resources: Arc<R>, policy: PollPolicy, cell: Arc<StepCell>) -> Self {
        Self {
            step: cell.step().to_string(),
            spec,
            resources,
            policy,
            cell,
            cancel: CancellationToken::new(),
            cleanup_on_cancel: false,
            events: EventSink::new(),
            arguments: IndexMap::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Delete the resource if the run is cancelled while it is in flight
    pub fn with_cleanup_on_cancel(mut self, cleanup: bool) -> Self {
        self.cleanup_on_cancel = cleanup;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Resolved step parameters, published under `arguments` in the outputs
    pub fn with_arguments(mut self, arguments: IndexMap<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Run the step to completion and return its terminal state
    pub async fn run(&self) -> StepState {
        let started_at = Utc::now();
        if !self.cell.transition(StepState::Submitting { started_at }).await {
            return self.settle(None).await;
        }

        info!(step = %self.step, action = ?self.spec.action, "submitting resource");
        let handle = match self.submit().await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(step = %self.step, error = %err, "resource submission rejected");
                let state = StepState::failed(FailureKind::from_submission(&err), err.to_string());
                return self.finish(state, None).await;
            }
        };

        self.events
            .emit(ExecutionEvent::ResourceSubmitted {
                step: self.step.clone(),
                resource: handle.clone(),
            })
            .await;

        let in_flight = match self.spec.action {
            ResourceAction::Delete => None,
            ResourceAction::Create | ResourceAction::Apply => Some(&handle),
        };

        if self.cancel.is_cancelled() {
            return self.abandon(in_flight).await;
        }

        if in_flight.is_none() || !self.spec.has_conditions() {
            let state = StepState::Succeeded {
                outputs: self.outputs(&handle, None),
                started_at,
                completed_at: Utc::now(),
            };
            return self.finish(state, in_flight).await;
        }

        self.await_completion(handle, started_at).await
    }

    async fn submit(&self) -> Result<ResourceHandle, ResourceError> {
        match self.spec.action {
            ResourceAction::Create => self.resources.create(&self.spec.manifest).await,
            ResourceAction::Apply => self.resources.apply(&self.spec.manifest).await,
            ResourceAction::Delete => {
                let handle = ResourceHandle::from_manifest(&self.spec.manifest).ok_or_else(|| {
                    ResourceError::rejected(
                        RejectionReason::InvalidManifest,
                        "delete needs a manifest with metadata.name",
                    )
                })?;
                self.resources.delete(&handle).await?;
                Ok(handle)
            }
        }
    }

    async fn await_completion(&self, handle: ResourceHandle, started_at: DateTime<Utc>) -> StepState {
        let awaiting = StepState::Awaiting {
            resource: handle.clone(),
            polls: 0,
            started_at,
        };
        if !self.cell.transition(awaiting).await {
            return self.settle(Some(&handle)).await;
        }

        let timeout = self.spec.timeout.unwrap_or(self.policy.timeout);
        let since = Instant::now();
        let deadline = since.checked_add(timeout).unwrap_or(since + FAR_FUTURE);
        let mut polls = 0usize;
        let mut last_error: Option<String> = None;

        loop {
            let read = tokio::time::timeout_at(deadline, self.resources.get_status(&handle));
            let observed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.abandon(Some(&handle)).await,
                observed = read => observed,
            };
            let Ok(observed) = observed else {
                warn!(step = %self.step, resource = %handle, polls, "status read still pending at the deadline");
                return self.time_out(since, polls, last_error, &handle).await;
            };
            polls += 1;

            match observed {
                Ok(document) => {
                    last_error = None;
                    let verdict = evaluate(
                        self.spec.success_condition.as_ref(),
                        self.spec.failure_condition.as_ref(),
                        &document,
                    );
                    debug!(step = %self.step, resource = %handle, polls, ?verdict, "resource polled");
                    self.events
                        .emit(ExecutionEvent::ResourcePolled {
                            step: self.step.clone(),
                            resource: handle.clone(),
                            polls,
                            verdict,
                        })
                        .await;

                    match verdict {
                        Verdict::Failed => {
                            let condition = self
                                .spec
                                .failure_condition
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default();
                            let state = StepState::failed(
                                FailureKind::Condition,
                                format!("failure condition '{}' met on {}", condition, handle),
                            );
                            return self.finish(state, Some(&handle)).await;
                        }
                        Verdict::Succeeded => {
                            let state = StepState::Succeeded {
                                outputs: self.outputs(&handle, Some(&document)),
                                started_at,
                                completed_at: Utc::now(),
                            };
                            return self.finish(state, Some(&handle)).await;
                        }
                        Verdict::Pending => {}
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(step = %self.step, resource = %handle, polls, error = %err, "status read failed, will retry");
                    last_error = Some(err.to_string());
                }
                Err(err) => {
                    let state = StepState::failed(FailureKind::ResourceLost, err.to_string());
                    return self.finish(state, Some(&handle)).await;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return self.time_out(since, polls, last_error, &handle).await;
            }

            let awaiting = StepState::Awaiting {
                resource: handle.clone(),
                polls,
                started_at,
            };
            if !self.cell.transition(awaiting).await {
                return self.settle(Some(&handle)).await;
            }

            let delay = self.policy.delay_for(polls - 1).min(deadline - now);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.abandon(Some(&handle)).await,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn outputs(&self, handle: &ResourceHandle, observed: Option<&Value>) -> Value {
        let mut outputs = self.spec.outputs(handle, observed);
        if self.arguments.is_empty() {
            return outputs;
        }
        if let Value::Object(map) = &mut outputs {
            let arguments = self.arguments.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            map.insert("arguments".to_string(), Value::Object(arguments));
        }
        outputs
    }

    async fn time_out(
        &self,
        since: Instant,
        polls: usize,
        last_error: Option<String>,
        handle: &ResourceHandle,
    ) -> StepState {
        let state = StepState::TimedOut {
            elapsed: since.elapsed(),
            polls,
            last_error,
            timed_out_at: Utc::now(),
        };
        self.finish(state, Some(handle)).await
    }

    /// Record a terminal state; falls back to whatever the cell already holds
    async fn finish(&self, state: StepState, handle: Option<&ResourceHandle>) -> StepState {
        if !self.cell.transition(state.clone()).await {
            return self.settle(handle).await;
        }

        match &state {
            StepState::Succeeded { .. } => info!(step = %self.step, "resource step succeeded"),
            StepState::Failed { kind, error, .. } => {
                warn!(step = %self.step, ?kind, %error, "resource step failed")
            }
            StepState::TimedOut { elapsed, polls, .. } => {
                warn!(step = %self.step, ?elapsed, polls, "resource step timed out")
            }
            _ => {}
        }
        state
    }

    async fn abandon(&self, handle: Option<&ResourceHandle>) -> StepState {
        info!(step = %self.step, "cancellation requested, abandoning resource step");
        self.cell.cancel("pipeline cancelled").await;
        self.settle(handle).await
    }

    /// Current cell state, cleaning up the resource if the step was cancelled
    async fn settle(&self, handle: Option<&ResourceHandle>) -> StepState {
        let state = self.cell.state().await;
        if state.phase() != StepPhase::Cancelled || !self.cleanup_on_cancel {
            return state;
        }

        if let Some(handle) = handle {
            match self.resources.delete(handle).await {
                Ok(()) => info!(step = %self.step, resource = %handle, "deleted resource of cancelled step"),
                Err(err) => warn!(step = %self.step, resource = %handle, error = %err, "cleanup failed"),
            }
        }
        state
    }
}
