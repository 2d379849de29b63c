//! Test: trusted-ai - train Job followed by two parallel model checks

use crate::helpers::*;
use resource_pipeline::component::ImagePullPolicy;
use resource_pipeline::core::config::PipelineConfig;
use resource_pipeline::core::ExecutionStatus;
use resource_pipeline::execution::{ExecutionEngine, ExecutionEvent};
use resource_pipeline::resource::InMemoryResourceManager;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/trusted-ai.yaml");

async fn scripted_cluster() -> Arc<InMemoryResourceManager> {
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status(
            "trusted-ai-train-job",
            vec![
                Ok(json!({ "status": { "active": 1 } })),
                Ok(json!({ "status": { "active": 1 } })),
                Ok(json!({ "status": { "succeeded": 1, "completionTime": "2020-06-01T12:00:00Z" } })),
            ],
        )
        .await;
    resources
}

#[tokio::test(start_paused = true)]
async fn test_trusted_ai_pipeline_end_to_end() {
    init_tracing();
    let config = PipelineConfig::from_file(FIXTURE).unwrap();
    let graph = config.to_graph().unwrap();
    let resources = scripted_cluster().await;
    let invoker = Arc::new(
        MockInvoker::new()
            .with_output("fairness-check", json!({ "metric_path": "/tmp/fairness.json" }))
            .with_output("robustness-check", json!({ "metric_path": "/tmp/robustness.json" }))
            .with_delay("fairness-check", Duration::from_secs(30))
            .with_delay("robustness-check", Duration::from_secs(10)),
    );

    let engine = ExecutionEngine::new(resources.clone(), invoker.clone(), config.engine_config());
    let polled = Arc::new(Mutex::new(0usize));
    let counter = polled.clone();
    engine
        .add_event_handler(move |event| {
            if let ExecutionEvent::ResourcePolled { .. } = event {
                *counter.lock().unwrap() += 1;
            }
        })
        .await;

    let report = engine.execute(&graph, CancellationToken::new()).await;

    assert_pipeline_status(&report, ExecutionStatus::Completed);
    assert_eq!(*polled.lock().unwrap(), 3);
    assert_eq!(resources.poll_count("trusted-ai-train-job").await, 3);

    let train = assert_step_succeeded(&report, "train");
    assert_eq!(train["name"], json!("trusted-ai-train-job"));
    assert_eq!(train["completion_time"], json!("2020-06-01T12:00:00Z"));

    // both checks start once train succeeded, robustness returns first
    assert_eq!(invoker.finish_order(), vec!["robustness-check", "fairness-check"]);

    let robustness = invoker.request_for("robustness-check").unwrap();
    assert_eq!(robustness.arguments["job_name"], json!("trusted-ai-train-job"));
    assert_eq!(robustness.arguments["epsilon"], json!("0.2"));
    assert_eq!(robustness.arguments["data_bucket_name"], json!("mlpipeline"));
    assert_eq!(robustness.image_pull_policy, Some(ImagePullPolicy::Always));

    let fairness = invoker.request_for("fairness-check").unwrap();
    assert_eq!(fairness.arguments["privileged_groups"], json!("[{'race': 0.0}]"));
    assert_eq!(fairness.arguments["result_bucket_name"], json!("mlpipeline"));
    assert_eq!(fairness.image_pull_policy, Some(ImagePullPolicy::Always));
    assert_eq!(fairness.component.uri.as_deref(), Some("components/fairness/component.yaml"));
}

#[tokio::test(start_paused = true)]
async fn test_parameter_override_reaches_component() {
    let config = PipelineConfig::from_file(FIXTURE).unwrap();
    let graph = config.to_graph().unwrap();
    let invoker = Arc::new(MockInvoker::new());
    let engine = ExecutionEngine::new(scripted_cluster().await, invoker.clone(), config.engine_config());

    let mut overrides = indexmap::IndexMap::new();
    overrides.insert("fgsm_attack_epsilon".to_string(), json!("0.5"));
    let report = engine
        .execute_with_parameters(&graph, overrides, CancellationToken::new())
        .await;

    assert!(report.is_success());
    let robustness = invoker.request_for("robustness-check").unwrap();
    assert_eq!(robustness.arguments["epsilon"], json!("0.5"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_training_skips_checks() {
    let config = PipelineConfig::from_file(FIXTURE).unwrap();
    let graph = config.to_graph().unwrap();
    let resources = Arc::new(InMemoryResourceManager::new());
    resources
        .script_status(
            "trusted-ai-train-job",
            vec![Ok(json!({ "status": { "failed": 1, "conditions": [{ "type": "Failed" }] } }))],
        )
        .await;
    let invoker = Arc::new(MockInvoker::new());

    let report = run_pipeline(&graph, resources, invoker.clone(), config.engine_config()).await;

    assert_pipeline_status(&report, ExecutionStatus::Failed);
    assert_step_skipped(&report, "fairness-check", "train");
    assert_step_skipped(&report, "robustness-check", "train");
    assert!(invoker.called_steps().is_empty());
}
