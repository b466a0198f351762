//! Fan-out then fan-in: four independent steps start in parallel, two
//! downstream steps wait on specific upstream results.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use swarm_core::resolver::ReResolverConfig;
use swarm_core::{CancellationToken, DagExecutor, ExecutionOutcome, ExecutorConfig, InMemoryCatalog};
use swarm_kernel::capability::{Capability, CapabilityRegistry, Parameter, ParameterType};
use swarm_kernel::plan::{ParamValue, Plan, Step};

use common::{service_for, FakeHttpServer, NullLlm, ScriptedResponse};

fn config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrency: 6,
        step_timeout: Duration::from_secs(5),
        total_timeout: Duration::from_secs(10),
        retry_attempts: 1,
        retry_delay: Duration::from_millis(10),
        max_validation_retries: 0,
        re_resolver: ReResolverConfig { enabled: false, max_attempts: 0, enable_for_independent_steps: false },
        step_complete_callback: None,
    }
}

fn param(name: &str, ty: ParameterType) -> Parameter {
    Parameter::new(name, ty, true)
}

#[tokio::test]
async fn six_step_plan_fans_out_then_fans_in() {
    let server = FakeHttpServer::start().await;
    server.script("/quote", vec![ScriptedResponse::ok(r#"{"price": 184.25}"#)]);
    server.script("/info", vec![ScriptedResponse::ok(r#"{"currency": "CHF"}"#)]);
    server.script("/geocode", vec![ScriptedResponse::ok(r#"{"lat": 47.37, "lon": 8.54}"#)]);
    server.script("/news", vec![ScriptedResponse::ok(r#"{"articles": []}"#)]);
    server.script("/convert", vec![ScriptedResponse::ok(r#"{"amount": 166.1}"#)]);
    server.script("/weather", vec![ScriptedResponse::ok(r#"{"temp_c": 18.0}"#)]);

    let catalog = InMemoryCatalog::new();
    catalog.replace_snapshot(vec![
        service_for(&server, "stock-quote", Capability::new("quote", "/quote").with_parameter(param("symbol", ParameterType::String))),
        service_for(&server, "country-info", Capability::new("info", "/info").with_parameter(param("country", ParameterType::String))),
        service_for(&server, "geocode", Capability::new("geocode", "/geocode").with_parameter(param("location", ParameterType::String))),
        service_for(&server, "news", Capability::new("news", "/news").with_parameter(param("query", ParameterType::String))),
        service_for(
            &server,
            "currency-convert",
            Capability::new("convert", "/convert")
                .with_parameter(param("from", ParameterType::String))
                .with_parameter(param("to", ParameterType::String))
                .with_parameter(param("amount", ParameterType::Number)),
        ),
        service_for(
            &server,
            "weather",
            Capability::new("weather", "/weather").with_parameter(param("lat", ParameterType::Number)).with_parameter(param("lon", ParameterType::Number)),
        ),
    ]);
    let catalog: Arc<dyn CapabilityRegistry> = Arc::new(catalog);

    let mut plan = Plan::new("Convert the price of TSLA to Swiss francs and give me weather + news for Zurich.");

    let mut step1 = Step::new("step-1", "stock-quote", "quote");
    step1.parameters.insert("symbol".into(), ParamValue::Literal(serde_json::json!("TSLA")));

    let mut step2 = Step::new("step-2", "country-info", "info");
    step2.parameters.insert("country".into(), ParamValue::Literal(serde_json::json!("Switzerland")));

    let mut step4 = Step::new("step-4", "geocode", "geocode");
    step4.parameters.insert("location".into(), ParamValue::Literal(serde_json::json!("Zurich")));

    let mut step6 = Step::new("step-6", "news", "news");
    step6.parameters.insert("query".into(), ParamValue::Literal(serde_json::json!("Zurich")));

    let mut step3 = Step::new("step-3", "currency-convert", "convert");
    step3.depends_on = HashSet::from(["step-1".to_string(), "step-2".to_string()]);
    step3.parameters.insert("from".into(), ParamValue::Literal(serde_json::json!("USD")));
    step3.parameters.insert("to".into(), ParamValue::Template("{{step-2.response.currency}}".into()));
    step3.parameters.insert("amount".into(), ParamValue::Template("{{step-1.response.price}}".into()));

    let mut step5 = Step::new("step-5", "weather", "weather");
    step5.depends_on = HashSet::from(["step-4".to_string()]);
    step5.parameters.insert("lat".into(), ParamValue::Template("{{step-4.response.lat}}".into()));
    step5.parameters.insert("lon".into(), ParamValue::Template("{{step-4.response.lon}}".into()));

    plan.steps = vec![step1, step2, step3, step4, step5, step6];
    plan.check_acyclic().unwrap();
    plan.check_dependency_closure().unwrap();
    plan.check_template_closure().unwrap();

    let llm: Arc<dyn swarm_kernel::llm::LlmClient> = Arc::new(NullLlm);
    let executor = DagExecutor::new(catalog, llm, config());
    let cancellation = CancellationToken::new();

    let outcome = executor.execute(&plan, &plan.original_request, "req-1", None, &cancellation).await.unwrap();

    let ExecutionOutcome::Completed(result) = outcome else { panic!("expected completion, got suspension") };
    assert!(result.success, "expected every step to succeed: {:?}", result.steps);
    assert_eq!(result.steps.len(), 6);

    let agents_involved: HashSet<String> = result.steps.iter().map(|s| s.agent_name.clone()).collect();
    assert_eq!(
        agents_involved,
        HashSet::from(["stock-quote", "country-info", "currency-convert", "geocode", "weather", "news"].map(String::from))
    );

    let root_starts: Vec<_> = result
        .steps
        .iter()
        .filter(|s| ["step-1", "step-2", "step-4", "step-6"].contains(&s.step_id.as_str()))
        .map(|s| s.start_time)
        .collect();
    let earliest = root_starts.iter().min().unwrap();
    let latest = root_starts.iter().max().unwrap();
    assert!(
        (*latest - *earliest) < chrono::Duration::milliseconds(200),
        "independent root steps should start close together (observed overlap), got spread {:?}",
        *latest - *earliest
    );

    assert_eq!(server.call_count("/convert"), 1);
    assert_eq!(server.call_count("/weather"), 1);
}
