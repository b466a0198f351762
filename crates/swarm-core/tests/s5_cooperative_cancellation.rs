//! Two independent long-running steps are cancelled mid-flight; the
//! executor must return promptly rather than waiting out the steps'
//! nominal duration.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_core::resolver::ReResolverConfig;
use swarm_core::{CancellationToken, DagExecutor, ExecutionOutcome, ExecutorConfig, InMemoryCatalog};
use swarm_kernel::capability::{Capability, CapabilityRegistry, Parameter, ParameterType};
use swarm_kernel::plan::{ParamValue, Plan, Step};

use common::{service_for, FakeHttpServer, NullLlm, ScriptedResponse};

fn config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrency: 2,
        step_timeout: Duration::from_secs(10),
        total_timeout: Duration::from_secs(10),
        retry_attempts: 0,
        retry_delay: Duration::from_millis(10),
        max_validation_retries: 0,
        re_resolver: ReResolverConfig { enabled: false, max_attempts: 0, enable_for_independent_steps: false },
        step_complete_callback: None,
    }
}

#[tokio::test]
async fn cancellation_aborts_in_flight_steps_well_before_their_nominal_duration() {
    let server = FakeHttpServer::start().await;
    server.script("/slow-a", vec![ScriptedResponse::ok("{}").with_delay(Duration::from_secs(5))]);
    server.script("/slow-b", vec![ScriptedResponse::ok("{}").with_delay(Duration::from_secs(5))]);

    let catalog = InMemoryCatalog::new();
    catalog.replace_snapshot(vec![
        service_for(&server, "slow-agent-a", Capability::new("run", "/slow-a").with_parameter(Parameter::new("arg", ParameterType::String, true))),
        service_for(&server, "slow-agent-b", Capability::new("run", "/slow-b").with_parameter(Parameter::new("arg", ParameterType::String, true))),
    ]);
    let catalog: Arc<dyn CapabilityRegistry> = Arc::new(catalog);

    let mut plan = Plan::new("run two slow things");
    let mut a = Step::new("step-a", "slow-agent-a", "run");
    a.parameters.insert("arg".into(), ParamValue::Literal(serde_json::json!("x")));
    let mut b = Step::new("step-b", "slow-agent-b", "run");
    b.parameters.insert("arg".into(), ParamValue::Literal(serde_json::json!("y")));
    plan.steps = vec![a, b];

    let llm: Arc<dyn swarm_kernel::llm::LlmClient> = Arc::new(NullLlm);
    let executor = DagExecutor::new(catalog, llm, config());
    let cancellation = CancellationToken::new();

    let cancel_after = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_after.cancel();
    });

    let started = Instant::now();
    let outcome = executor.execute(&plan, &plan.original_request, "req-5", None, &cancellation).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(500), "expected cancellation to short-circuit well under 500ms, took {elapsed:?}");

    let ExecutionOutcome::Completed(result) = outcome else { panic!("cancellation degrades to a completed, unsuccessful result") };
    assert!(!result.success);
    for step_result in &result.steps {
        assert!(!step_result.success);
        assert_eq!(step_result.error.as_deref(), Some("cancelled"));
    }
}
