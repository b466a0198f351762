//! Planner (C3) — turns a user request + capability description into a
//! validated [`Plan`], §4.2.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use swarm_kernel::capability::CapabilityRegistry;
use swarm_kernel::llm::{GenerateOptions, LlmClient};
use swarm_kernel::plan::{ParamValue, Plan, Step};
use swarm_kernel::{KernelError, KernelResult};
use tracing::{info, instrument, warn};

use crate::provider::ProviderOutput;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub plan_parse_max_retries: usize,
    pub hallucination_max_retries: usize,
    pub hallucination_validation_enabled: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { plan_parse_max_retries: 2, hallucination_max_retries: 1, hallucination_validation_enabled: true }
    }
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    catalog: Option<Arc<dyn CapabilityRegistry>>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, config: PlannerConfig) -> Self {
        Self { llm, catalog: None, config }
    }

    /// Attach the catalog so case (b) of I3 (tiered-selection miss) can be
    /// checked: an agent absent from the allowed set but present and
    /// non-internal in the catalog is admitted with a warning.
    pub fn with_catalog(mut self, catalog: Arc<dyn CapabilityRegistry>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[instrument(skip(self, provider_output), fields(plan_parse_attempt, hallucination_attempt))]
    pub async fn plan(&self, user_request: &str, provider_output: &ProviderOutput) -> KernelResult<Plan> {
        let mut prompt = build_prompt(user_request, &provider_output.description);
        let mut last_parse_err = None;
        let mut wire = None;

        for attempt in 0..=self.config.plan_parse_max_retries {
            tracing::Span::current().record("plan_parse_attempt", attempt as u64);
            let response = self
                .llm
                .generate(&prompt, GenerateOptions::deterministic())
                .await
                .map_err(|e| KernelError::Routing(e.to_string()))?;

            match extract_plan_json(&response.content).and_then(parse_plan_wire) {
                Ok(w) => {
                    wire = Some(w);
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "plan JSON parse failed, retrying");
                    last_parse_err = Some(e);
                    prompt = format!(
                        "{prompt}\n\nYour previous response could not be parsed as the required JSON \
                         object ({last_parse_err:?}). Return ONLY a single valid JSON object matching \
                         the schema, with no markdown fences or commentary."
                    );
                }
            }
        }

        let wire = wire.ok_or_else(|| {
            KernelError::InvalidPlan(format!(
                "plan JSON parse failed after {} attempts: {:?}",
                self.config.plan_parse_max_retries + 1,
                last_parse_err
            ))
        })?;

        let mut plan = wire_to_plan(user_request, wire);

        if self.config.hallucination_validation_enabled {
            plan = self.guard_against_hallucination(user_request, provider_output, plan).await?;
        }

        plan.check_acyclic().map_err(KernelError::InvalidPlan)?;
        plan.check_dependency_closure().map_err(KernelError::InvalidPlan)?;
        plan.check_template_closure().map_err(KernelError::InvalidPlan)?;

        Ok(plan)
    }

    /// Hallucination Guard (§4.2): validates I3, regenerating up to
    /// `hallucination_max_retries` times with a `[CAPABILITY_HINT: ...]`
    /// suffix when an unresolvable `agent_name` is found.
    async fn guard_against_hallucination(
        &self,
        user_request: &str,
        provider_output: &ProviderOutput,
        mut plan: Plan,
    ) -> KernelResult<Plan> {
        let mut prompt = build_prompt(user_request, &provider_output.description);

        for attempt in 0..=self.config.hallucination_max_retries {
            tracing::Span::current().record("hallucination_attempt", attempt as u64);
            match self.find_hallucination(provider_output, &plan) {
                None => return Ok(plan),
                Some(offending_step) if attempt == self.config.hallucination_max_retries => {
                    return Err(KernelError::HallucinatedAgent(offending_step.agent_name));
                }
                Some(offending_step) => {
                    info!(agent = %offending_step.agent_name, "hallucinated agent, regenerating with capability hint");
                    let agent_type = self
                        .resolve_capability_owner(provider_output, &offending_step.capability_name)
                        .unwrap_or_else(|| offending_step.agent_name.clone());
                    let hint = format!(
                        "[CAPABILITY_HINT: perform: {}; agent type: {}; capability: {}]",
                        offending_step.instruction, agent_type, offending_step.capability_name
                    );
                    prompt = format!("{prompt}\n\n{hint}");
                    let response = self
                        .llm
                        .generate(&prompt, GenerateOptions::deterministic())
                        .await
                        .map_err(|e| KernelError::Routing(e.to_string()))?;
                    let wire = extract_plan_json(&response.content)
                        .and_then(parse_plan_wire)
                        .map_err(KernelError::InvalidPlan)?;
                    plan = wire_to_plan(user_request, wire);
                }
            }
        }

        Ok(plan)
    }

    /// Finds the real agent that offers `capability_name`, so a hallucinated
    /// step's hint can name the right agent instead of echoing back the
    /// made-up one. Prefers a match within the allowed set; falls back to
    /// any non-internal catalog match.
    fn resolve_capability_owner(&self, provider_output: &ProviderOutput, capability_name: &str) -> Option<String> {
        let catalog = self.catalog.as_ref()?;
        let mut fallback = None;
        for service in catalog.list_all() {
            if !service.has_public_capability() {
                continue;
            }
            if service.find_capability(capability_name).is_none() {
                continue;
            }
            if provider_output.allowed_agent_names.contains(&service.key()) {
                return Some(service.key());
            }
            fallback.get_or_insert_with(|| service.key());
        }
        fallback
    }

    /// Returns the first step whose `agent_name` resolves to neither the
    /// allowed set nor a public catalog entry (I3).
    fn find_hallucination<'a>(&self, provider_output: &ProviderOutput, plan: &'a Plan) -> Option<&'a Step> {
        plan.steps.iter().find(|step| {
            let name = step.agent_name.to_lowercase();
            if provider_output.allowed_agent_names.contains(&name) {
                return false;
            }
            if let Some(catalog) = &self.catalog {
                if let Some(svc) = catalog.lookup(&name) {
                    if svc.has_public_capability() {
                        // Tiered-selection miss — admitted with a warning, not a hallucination.
                        warn!(agent = %name, "tiered-selection miss: agent in catalog but not in allowed set");
                        return false;
                    }
                }
            }
            true
        })
    }
}

fn build_prompt(user_request: &str, capability_description: &str) -> String {
    format!(
        "User request: {user_request}\n\n\
         Available capabilities:\n{capability_description}\n\n\
         Produce a JSON plan with this exact shape:\n\
         {{\"plan_id\": \"...\", \"original_request\": \"...\", \"steps\": [\
         {{\"step_id\": \"step-1\", \"agent_name\": \"<lowercased service name>\", \"instruction\": \"...\", \
         \"depends_on\": [], \"metadata\": {{\"capability\": \"<capability name>\", \"parameters\": {{}}}}}}]}}\n\
         Return ONLY the JSON object, no markdown fences, no commentary."
    )
}

use crate::json_extract::extract_json_object as extract_plan_json;

#[derive(Debug, Deserialize)]
struct PlanWire {
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    original_request: Option<String>,
    steps: Vec<StepWire>,
}

#[derive(Debug, Deserialize)]
struct StepWire {
    step_id: String,
    agent_name: String,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    depends_on: HashSet<String>,
    #[serde(default)]
    metadata: StepMetadataWire,
}

#[derive(Debug, Deserialize, Default)]
struct StepMetadataWire {
    #[serde(default)]
    capability: String,
    #[serde(default)]
    parameters: HashMap<String, serde_json::Value>,
}

fn parse_plan_wire(json: String) -> Result<PlanWire, String> {
    serde_json::from_str(&json).map_err(|e| e.to_string())
}

fn wire_to_plan(user_request: &str, wire: PlanWire) -> Plan {
    let mut plan = Plan::new(wire.original_request.unwrap_or_else(|| user_request.to_string()));
    if let Some(id) = wire.plan_id {
        plan.plan_id = id;
    }
    plan.steps = wire
        .steps
        .into_iter()
        .map(|s| {
            let mut step = Step::new(s.step_id, s.agent_name.to_lowercase(), s.metadata.capability);
            step.instruction = s.instruction;
            step.depends_on = s.depends_on;
            step.parameters = s
                .metadata
                .parameters
                .into_iter()
                .map(|(k, v)| (k, param_value_from_json(v)))
                .collect();
            step
        })
        .collect();
    plan
}

fn param_value_from_json(value: serde_json::Value) -> ParamValue {
    if let serde_json::Value::String(s) = &value {
        if swarm_kernel::plan::is_template_ref(s) {
            return ParamValue::Template(s.clone());
        }
    }
    ParamValue::Literal(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_plan_json_strips_fences_and_trailing_commentary() {
        let raw = "Here you go:\n```json\n{\"plan_id\": \"p1\", \"steps\": []}\n```\nHope that helps.";
        let extracted = extract_plan_json(raw).unwrap();
        assert_eq!(extracted, r#"{"plan_id": "p1", "steps": []}"#);
    }

    #[test]
    fn extract_plan_json_respects_braces_inside_strings() {
        let raw = r#"{"plan_id": "p1", "original_request": "do {this}", "steps": []}"#;
        let extracted = extract_plan_json(raw).unwrap();
        assert_eq!(extracted, raw);
    }

    #[test]
    fn wire_to_plan_lowercases_agent_name_and_tags_templates() {
        let wire = PlanWire {
            plan_id: Some("p1".into()),
            original_request: Some("req".into()),
            steps: vec![StepWire {
                step_id: "step-1".into(),
                agent_name: "Stock-Quote".into(),
                instruction: "get price".into(),
                depends_on: HashSet::new(),
                metadata: StepMetadataWire {
                    capability: "quote".into(),
                    parameters: HashMap::from([
                        ("symbol".to_string(), serde_json::json!("TSLA")),
                        ("amount".to_string(), serde_json::json!("{{step-0.response.amount}}")),
                    ]),
                },
            }],
        };
        let plan = wire_to_plan("req", wire);
        let step = &plan.steps[0];
        assert_eq!(step.agent_name, "stock-quote");
        assert!(matches!(step.parameters["symbol"], ParamValue::Literal(_)));
        assert!(step.parameters["amount"].as_template().is_some());
    }
}
