//! A step targeting a sensitive capability suspends before it ever runs;
//! once the checkpoint's timeout elapses the expiry processor resolves it
//! to the configured default action.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::{
    CancellationToken, CheckpointStore, DagExecutor, ExecutionOutcome, ExecutorConfig, ExpiryDelivery, ExpiryProcessor, HitlConfig,
    InMemoryCatalog, InMemoryCheckpointStore,
};
use swarm_kernel::capability::{Capability, CapabilityRegistry, Parameter, ParameterType};
use swarm_kernel::checkpoint::{CheckpointStatus, DefaultAction};
use swarm_kernel::plan::{ParamValue, Plan, Step};

use common::{service_for, FakeHttpServer, NullLlm, ScriptedResponse};

fn hitl_config() -> HitlConfig {
    HitlConfig {
        enabled: true,
        require_plan_approval: false,
        sensitive_agents: HashSet::new(),
        sensitive_capabilities: HashSet::from(["transfer_funds".to_string()]),
        default_timeout: Duration::from_secs(1),
        default_action: DefaultAction::Reject,
        escalate_after_failures: 3,
        expiry_enabled: true,
        expiry_scan_interval: Duration::from_millis(100),
        expiry_batch_size: 100,
        expiry_delivery: ExpiryDelivery::AtMostOnce,
        streaming_expiry_behavior: swarm_core::StreamingExpiryBehavior::ImplicitDeny,
    }
}

fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrency: 2,
        step_timeout: Duration::from_secs(5),
        total_timeout: Duration::from_secs(10),
        retry_attempts: 1,
        retry_delay: Duration::from_millis(10),
        max_validation_retries: 0,
        re_resolver: swarm_core::resolver::ReResolverConfig { enabled: false, max_attempts: 0, enable_for_independent_steps: false },
        step_complete_callback: None,
    }
}

#[tokio::test]
async fn sensitive_step_suspends_then_expires_rejected() {
    let server = FakeHttpServer::start().await;
    server.script("/transfer", vec![ScriptedResponse::ok(r#"{"status": "ok"}"#)]);

    let catalog = InMemoryCatalog::new();
    catalog.replace_snapshot(vec![service_for(
        &server,
        "payments",
        Capability::new("transfer_funds", "/transfer")
            .with_parameter(Parameter::new("to_account", ParameterType::String, true))
            .with_parameter(Parameter::new("amount", ParameterType::Number, true)),
    )]);
    let catalog: Arc<dyn CapabilityRegistry> = Arc::new(catalog);

    let mut plan = Plan::new("transfer 500 to savings");
    let mut step = Step::new("step-1", "payments", "transfer_funds");
    step.parameters.insert("to_account".into(), ParamValue::Literal(serde_json::json!("savings")));
    step.parameters.insert("amount".into(), ParamValue::Literal(serde_json::json!(500)));
    plan.steps = vec![step];

    let llm: Arc<dyn swarm_kernel::llm::LlmClient> = Arc::new(NullLlm);
    let executor = DagExecutor::new(catalog, llm, executor_config()).with_hitl(hitl_config());
    let cancellation = CancellationToken::new();

    let outcome = executor.execute(&plan, &plan.original_request, "req-4", None, &cancellation).await.unwrap();
    let ExecutionOutcome::Suspended(checkpoint) = outcome else { panic!("expected suspension before the sensitive step ran") };

    assert_eq!(checkpoint.status, CheckpointStatus::Pending);
    assert_eq!(checkpoint.current_step.as_deref(), Some("step-1"));
    assert_eq!(server.call_count("/transfer"), 0, "a suspended step must never actually dispatch");

    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let checkpoint_id = checkpoint.checkpoint_id.clone();
    store.save(checkpoint).await.unwrap();

    let mut processor = ExpiryProcessor::new(store.clone(), hitl_config(), "test-worker");
    processor.start();
    tokio::time::sleep(Duration::from_millis(1300)).await;
    processor.stop().await;

    let loaded = store.load(&checkpoint_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, CheckpointStatus::ExpiredRejected);
    assert_eq!(server.call_count("/transfer"), 0, "the expired step still never ran");
}
