//! An internal-only capability must never reach the Planner's prompt or
//! allowed set, and a plan that names it anyway fails the Hallucination
//! Guard rather than being admitted as a tiered-selection miss.

mod common;

use async_trait::async_trait;
use std::sync::Arc;
use swarm_core::{CapabilityProvider, InMemoryCatalog, LocalProvider, Planner, PlannerConfig};
use swarm_kernel::capability::{Capability, CapabilityRegistry, Parameter, ParameterType, Service};
use swarm_kernel::llm::{GenerateOptions, GenerateResponse, LlmClient, LlmError};
use swarm_kernel::KernelError;

fn catalog() -> Arc<dyn CapabilityRegistry> {
    let catalog = InMemoryCatalog::new();
    catalog.replace_snapshot(vec![Service {
        id: "orchestrator".into(),
        name: "orchestrator".into(),
        address: "127.0.0.1".into(),
        port: 9002,
        capabilities: vec![Capability::new("orchestrate_natural", "/orchestrate").internal()],
    }, Service {
        id: "weather".into(),
        name: "weather".into(),
        address: "127.0.0.1".into(),
        port: 9003,
        capabilities: vec![Capability::new("forecast", "/forecast").with_parameter(Parameter::new("location", ParameterType::String, true))],
    }]);
    Arc::new(catalog)
}

struct FixedResponseLlm(String);

#[async_trait]
impl LlmClient for FixedResponseLlm {
    async fn generate(&self, _prompt: &str, _options: GenerateOptions) -> Result<GenerateResponse, LlmError> {
        Ok(GenerateResponse { content: self.0.clone(), model: "scripted".into(), provider: "scripted".into(), usage: Default::default() })
    }
}

#[tokio::test]
async fn internal_capability_never_surfaces_to_the_provider_output() {
    let catalog = catalog();
    let provider = LocalProvider::new(catalog);
    let output = provider.get_description("what's the weather").await.unwrap();

    assert!(!output.description.contains("orchestrate_natural"));
    assert!(output.description.contains("forecast"));
    assert!(!output.allowed_agent_names.contains("orchestrator"), "an agent whose only capability is internal has no public entry point");
}

#[tokio::test]
async fn plan_naming_internal_capability_fails_hallucination_guard() {
    let catalog = catalog();
    let provider = LocalProvider::new(catalog.clone());
    let output = provider.get_description("orchestrate everything").await.unwrap();

    // The LLM hallucinates a plan step invoking the internal capability's
    // owning agent directly, bypassing the allowed set entirely.
    let plan_json = r#"{"plan_id": "p1", "original_request": "orchestrate everything", "steps": [
        {"step_id": "step-1", "agent_name": "orchestrator", "instruction": "do it all",
         "depends_on": [], "metadata": {"capability": "orchestrate_natural", "parameters": {}}}
    ]}"#;
    let llm: Arc<dyn LlmClient> = Arc::new(FixedResponseLlm(plan_json.to_string()));

    let planner = Planner::new(llm, PlannerConfig { hallucination_max_retries: 0, ..Default::default() }).with_catalog(catalog);
    let result = planner.plan("orchestrate everything", &output).await;

    assert!(matches!(result, Err(KernelError::HallucinatedAgent(ref name)) if name == "orchestrator"));
}
