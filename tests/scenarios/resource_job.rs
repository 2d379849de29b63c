//! Test: Resource Job - create a Job, poll it, gate on its conditions

use crate::helpers::*;
use resource_pipeline::core::{
    Condition, ExecutionStatus, FailureKind, FieldPath, PipelineBuilder, ResourceAction, ResourceSpec, Step,
    StepPhase, StepState,
};
use resource_pipeline::execution::{PollPolicy, ResourceStepController, StepCell};
use resource_pipeline::resource::{InMemoryResourceManager, ResourceError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn job_spec(name: &str) -> ResourceSpec {
    ResourceSpec::create(job_manifest(name))
        .with_success_condition(Condition::parse("status.succeeded > 0").unwrap())
        .with_failure_condition(Condition::parse("status.failed > 0").unwrap())
}

/// The Job reports active twice, then succeeded
#[tokio::test(start_paused = true)]
async fn test_job_succeeds_on_third_poll() {
    init_tracing();
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status(
            "train",
            vec![
                Ok(json!({ "status": { "active": 1 } })),
                Ok(json!({ "status": { "active": 1 } })),
                Ok(json!({ "status": { "succeeded": 1, "completionTime": "2024-01-01T00:00:00Z" } })),
            ],
        )
        .await;

    let cell = Arc::new(StepCell::new("train"));
    let spec = job_spec("train").with_attribute_output("completed", FieldPath::parse("status.completionTime").unwrap());
    let controller = ResourceStepController::new(spec, resources.clone(), PollPolicy::default(), cell.clone());

    let state = controller.run().await;

    assert_eq!(state.phase(), StepPhase::Succeeded);
    assert_eq!(resources.poll_count("train").await, 3);
    assert_eq!(
        cell.history().await,
        vec![
            StepPhase::Pending,
            StepPhase::Submitting,
            StepPhase::Awaiting,
            StepPhase::Awaiting,
            StepPhase::Awaiting,
            StepPhase::Succeeded,
        ]
    );
    let outputs = state.outputs().unwrap();
    assert_eq!(outputs["completed"], json!("2024-01-01T00:00:00Z"));
    assert_eq!(outputs["manifest"]["status"]["succeeded"], json!(1));
}

/// A status that never populates times out exactly at the deadline
#[tokio::test(start_paused = true)]
async fn test_never_populated_status_times_out_at_deadline() {
    init_tracing();
    let resources = Arc::new(InMemoryResourceManager::new());
    let timeout = Duration::from_secs(45);

    let cell = Arc::new(StepCell::new("train"));
    let spec = job_spec("train").with_timeout(timeout);
    let controller = ResourceStepController::new(spec, resources.clone(), PollPolicy::default(), cell.clone());

    match controller.run().await {
        StepState::TimedOut {
            elapsed,
            polls,
            last_error,
            ..
        } => {
            assert!(elapsed >= timeout, "timed out early: {:?}", elapsed);
            assert!(elapsed < timeout + Duration::from_millis(5), "timed out late: {:?}", elapsed);
            assert_eq!(polls, resources.poll_count("train").await);
            assert!(last_error.is_none());
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(cell.phase().await, StepPhase::TimedOut);
}

/// Success and failure both hold on one observation: failure wins
#[tokio::test(start_paused = true)]
async fn test_failure_beats_success_on_same_observation() {
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status("train", vec![Ok(json!({ "status": { "succeeded": 1, "failed": 1 } }))])
        .await;

    let mut builder = PipelineBuilder::new("tie");
    builder.add_step(Step::resource("train", job_spec("train"))).unwrap();
    let graph = builder.finalize().unwrap();

    let report = run_pipeline(&graph, resources, Arc::new(MockInvoker::new()), fast_config()).await;

    assert_pipeline_status(&report, ExecutionStatus::Failed);
    assert_step_failed(&report, "train", "status.failed > 0");
    match report.state("train") {
        Some(StepState::Failed { kind, .. }) => assert_eq!(*kind, FailureKind::Condition),
        other => panic!("unexpected state {:?}", other),
    }
}

/// Without conditions the step succeeds as soon as the resource exists
#[tokio::test(start_paused = true)]
async fn test_generated_name_without_conditions() {
    let resources = Arc::new(InMemoryResourceManager::new());
    let manifest = json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "generateName": "resourceop-basic-job-" }
    });

    let mut builder = PipelineBuilder::new("resourceop-basic");
    builder
        .add_step(Step::resource("test-step", ResourceSpec::new(ResourceAction::Apply, manifest)))
        .unwrap();
    let graph = builder.finalize().unwrap();

    let report = run_pipeline(&graph, resources.clone(), Arc::new(MockInvoker::new()), fast_config()).await;

    assert_pipeline_status(&report, ExecutionStatus::Completed);
    let outputs = assert_step_succeeded(&report, "test-step");
    let name = outputs["name"].as_str().unwrap();
    assert!(name.starts_with("resourceop-basic-job-"), "unexpected name {}", name);
    assert!(resources.contains(name).await);
    assert_eq!(resources.poll_count(name).await, 0);
}

/// Transient read errors are retried until the resource reports success
#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status(
            "train",
            vec![
                Err(ResourceError::Transient("etcd leader changed".into())),
                Err(ResourceError::Transient("etcd leader changed".into())),
                Ok(json!({ "status": { "succeeded": 1 } })),
            ],
        )
        .await;

    let mut builder = PipelineBuilder::new("flaky");
    builder.add_step(Step::resource("train", job_spec("train"))).unwrap();
    let graph = builder.finalize().unwrap();

    let report = run_pipeline(&graph, resources.clone(), Arc::new(MockInvoker::new()), fast_config()).await;

    assert_pipeline_status(&report, ExecutionStatus::Completed);
    assert_eq!(resources.poll_count("train").await, 3);
}
