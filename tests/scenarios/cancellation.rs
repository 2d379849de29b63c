//! Test: Cancellation - stop polling, clean up, cancel what is left

use crate::helpers::*;
use resource_pipeline::component::ComponentRef;
use resource_pipeline::core::{
    Condition, ExecutionStatus, InvocationSpec, PipelineBuilder, PipelineGraph, ResourceSpec, Step, StepPhase,
};
use resource_pipeline::execution::{EngineConfig, ExecutionEngine};
use resource_pipeline::resource::InMemoryResourceManager;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// train (never finishes) -> check
fn graph() -> PipelineGraph {
    let mut builder = PipelineBuilder::new("cancel-me");
    builder
        .add_step(Step::resource(
            "train",
            ResourceSpec::create(job_manifest("train"))
                .with_success_condition(Condition::parse("status.succeeded > 0").unwrap()),
        ))
        .unwrap();
    builder
        .add_step(Step::invocation("check", InvocationSpec::new(ComponentRef::new("check"))).after("train"))
        .unwrap();
    builder.finalize().unwrap()
}

async fn run_and_cancel_after(
    resources: Arc<InMemoryResourceManager>,
    invoker: Arc<MockInvoker>,
    config: EngineConfig,
    after: Duration,
) -> resource_pipeline::execution::PipelineReport {
    init_tracing();
    let engine = ExecutionEngine::new(resources, invoker, config);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        trigger.cancel();
    });

    engine.execute(&graph(), cancel).await
}

#[tokio::test(start_paused = true)]
async fn test_cancel_deletes_awaited_resource() {
    let resources = Arc::new(InMemoryResourceManager::new());
    let invoker = Arc::new(MockInvoker::new());
    let config = EngineConfig {
        cleanup_on_cancel: true,
        ..fast_config()
    };

    let report = run_and_cancel_after(resources.clone(), invoker.clone(), config, Duration::from_secs(5)).await;

    assert_pipeline_status(&report, ExecutionStatus::Cancelled);
    assert_eq!(report.cancelled(), vec!["train", "check"]);
    assert!(!resources.contains("train").await);
    assert_eq!(resources.deleted().await.len(), 1);
    assert!(invoker.called_steps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_without_cleanup_leaves_resource() {
    let resources = Arc::new(InMemoryResourceManager::new());
    let invoker = Arc::new(MockInvoker::new());

    let report = run_and_cancel_after(resources.clone(), invoker, fast_config(), Duration::from_secs(5)).await;

    assert_pipeline_status(&report, ExecutionStatus::Cancelled);
    assert!(resources.contains("train").await);
    assert!(resources.deleted().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_polling_stops_after_cancel() {
    let resources = Arc::new(InMemoryResourceManager::new());
    let invoker = Arc::new(MockInvoker::new());

    run_and_cancel_after(resources.clone(), invoker, fast_config(), Duration::from_secs(5)).await;
    let polls = resources.poll_count("train").await;

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(resources.poll_count("train").await, polls);
}

#[tokio::test(start_paused = true)]
async fn test_finished_steps_keep_their_state() {
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status("train", vec![Ok(serde_json::json!({ "status": { "succeeded": 1 } }))])
        .await;
    let invoker = Arc::new(MockInvoker::new().with_delay("check", Duration::from_secs(60)));

    let report = run_and_cancel_after(resources, invoker.clone(), fast_config(), Duration::from_secs(10)).await;

    assert_pipeline_status(&report, ExecutionStatus::Cancelled);
    assert_eq!(report.state("train").map(|s| s.phase()), Some(StepPhase::Succeeded));
    assert_eq!(report.state("check").map(|s| s.phase()), Some(StepPhase::Cancelled));
    assert_eq!(invoker.called_steps(), vec!["check"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_submission_deletes_created_resource() {
    let resources = Arc::new(InMemoryResourceManager::new().with_submit_latency(Duration::from_secs(10)));
    let invoker = Arc::new(MockInvoker::new());
    let config = EngineConfig {
        cleanup_on_cancel: true,
        ..fast_config()
    };

    let report = run_and_cancel_after(resources.clone(), invoker.clone(), config, Duration::from_secs(5)).await;

    assert_pipeline_status(&report, ExecutionStatus::Cancelled);
    assert_eq!(report.cancelled(), vec!["train", "check"]);
    assert_eq!(resources.poll_count("train").await, 0);
    assert!(!resources.contains("train").await);
    assert_eq!(resources.deleted().await.len(), 1);
    assert!(invoker.called_steps().is_empty());
}
