//! Test: Failure Propagation - downstream steps are skipped, never started

use crate::helpers::*;
use resource_pipeline::component::ComponentRef;
use resource_pipeline::core::{
    Condition, ExecutionStatus, FailureKind, InvocationSpec, PipelineBuilder, PipelineGraph, ResourceSpec, Step,
    StepState,
};
use resource_pipeline::resource::{InMemoryResourceManager, RejectionReason};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn job_spec(name: &str) -> ResourceSpec {
    ResourceSpec::create(job_manifest(name))
        .with_success_condition(Condition::parse("status.succeeded > 0").unwrap())
        .with_failure_condition(Condition::parse("status.failed > 0").unwrap())
}

/// A (resource) -> B (invocation) -> C (resource)
fn chain() -> PipelineGraph {
    let mut builder = PipelineBuilder::new("chain");
    builder.add_step(Step::resource("a", job_spec("job-a"))).unwrap();
    builder
        .add_step(Step::invocation("b", InvocationSpec::new(ComponentRef::new("evaluate"))))
        .unwrap();
    builder.add_step(Step::resource("c", job_spec("job-c"))).unwrap();
    builder.add_dependency("a", "b").unwrap();
    builder.add_dependency("b", "c").unwrap();
    builder.finalize().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_failed_resource_skips_whole_chain() {
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status(
            "job-a",
            vec![Ok(json!({ "status": { "active": 1 } })), Ok(json!({ "status": { "failed": 1 } }))],
        )
        .await;
    let invoker = Arc::new(MockInvoker::new());

    let report = run_pipeline(&chain(), resources.clone(), invoker.clone(), fast_config()).await;

    assert_pipeline_status(&report, ExecutionStatus::Failed);
    assert_step_failed(&report, "a", "status.failed > 0");
    assert_step_skipped(&report, "b", "a");
    assert_step_skipped(&report, "c", "b");
    assert_eq!(report.skipped(), vec!["b", "c"]);

    assert!(invoker.called_steps().is_empty());
    assert!(!resources.contains("job-c").await);
    assert_eq!(resources.resources().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_creation_skips_dependents() {
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .reject_creation("job-a", RejectionReason::InvalidManifest, "spec.template is required")
        .await;
    let invoker = Arc::new(MockInvoker::new());

    let report = run_pipeline(&chain(), resources.clone(), invoker.clone(), fast_config()).await;

    match report.state("a") {
        Some(StepState::Failed { kind, error, .. }) => {
            assert_eq!(*kind, FailureKind::Creation(RejectionReason::InvalidManifest));
            assert!(error.contains("spec.template"));
        }
        other => panic!("expected creation failure, got {:?}", other),
    }
    assert_eq!(resources.poll_count("job-a").await, 0);
    assert_step_skipped(&report, "b", "a");
    assert_step_skipped(&report, "c", "b");
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_resource_skips_dependents() {
    let resources = Arc::new(InMemoryResourceManager::new());
    let invoker = Arc::new(MockInvoker::new());

    let mut builder = PipelineBuilder::new("slow");
    builder
        .add_step(Step::resource(
            "a",
            job_spec("job-a").with_timeout(Duration::from_secs(10)),
        ))
        .unwrap();
    builder
        .add_step(Step::invocation("b", InvocationSpec::new(ComponentRef::new("evaluate"))).after("a"))
        .unwrap();
    let graph = builder.finalize().unwrap();

    let report = run_pipeline(&graph, resources, invoker.clone(), fast_config()).await;

    assert_eq!(report.timed_out(), vec!["a"]);
    assert_step_skipped(&report, "b", "timed out");
    assert!(invoker.called_steps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_invocation_skips_resource_step() {
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status("job-a", vec![Ok(json!({ "status": { "succeeded": 1 } }))])
        .await;
    let invoker = Arc::new(MockInvoker::new().with_failure("evaluate", "accuracy below threshold"));

    let report = run_pipeline(&chain(), resources.clone(), invoker.clone(), fast_config()).await;

    assert_step_succeeded(&report, "a");
    assert_step_failed(&report, "b", "accuracy below threshold");
    assert_step_skipped(&report, "c", "b");
    assert!(!resources.contains("job-c").await);
}
