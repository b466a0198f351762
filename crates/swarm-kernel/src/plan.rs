//! Plan / Step / execution-result data model (§3, §6 "Plan JSON").
//!
//! `ParamValue` is the tagged representation Design Note §9 calls for:
//! "Represent step parameters as tagged values `{kind, raw}`; resolver
//! outputs a typed map that the JSON encoder emits directly." A literal
//! parameter value in a `Step` is either a concrete JSON value or a
//! template reference string (`{{step-id.response.path}}`) still awaiting
//! resolution; the resolver layers in `swarm-core` turn every parameter
//! into a plain `serde_json::Value` before dispatch.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A parameter value as it appears in a `Step` before resolution: either a
/// literal JSON value (already typed per the capability schema) or a
/// template string referencing an upstream step's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Literal(serde_json::Value),
    Template(String),
}

impl ParamValue {
    /// A template reference has the shape `{{<step-id>.response.<path>}}`.
    pub fn as_template(&self) -> Option<&str> {
        match self {
            ParamValue::Template(s) if is_template_ref(s) => Some(s),
            _ => None,
        }
    }
}

/// Whether a raw string is a `{{...}}` template reference.
pub fn is_template_ref(s: &str) -> bool {
    s.starts_with("{{") && s.ends_with("}}")
}

/// One capability invocation inside a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub agent_name: String,
    pub capability_name: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub parameters: HashMap<String, ParamValue>,
    #[serde(default)]
    pub depends_on: HashSet<String>,
}

impl Step {
    pub fn new(step_id: impl Into<String>, agent_name: impl Into<String>, capability_name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            agent_name: agent_name.into(),
            capability_name: capability_name.into(),
            instruction: String::new(),
            parameters: HashMap::new(),
            depends_on: HashSet::new(),
        }
    }
}

/// A validated DAG of steps produced by the planner from a user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub original_request: String,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(original_request: impl Into<String>) -> Self {
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            original_request: original_request.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// I1: `depends_on` forms a DAG (no cycles). Returns the offending
    /// step id on failure.
    pub fn check_acyclic(&self) -> Result<(), String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = self
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), Mark::Unvisited))
            .collect();

        fn visit<'a>(
            plan: &'a Plan,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), String> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => return Err(id.to_string()),
                _ => {}
            }
            marks.insert(id, Mark::InProgress);
            if let Some(step) = plan.step(id) {
                for dep in &step.depends_on {
                    visit(plan, dep, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for step in &self.steps {
            visit(self, &step.step_id, &mut marks)?;
        }
        Ok(())
    }

    /// I2: every `step_id` in any `depends_on` exists in the plan.
    pub fn check_dependency_closure(&self) -> Result<(), String> {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "step {:?} depends on unknown step {:?}",
                        step.step_id, dep
                    ));
                }
            }
        }
        Ok(())
    }

    /// I4: every referenced step-id in a template appears in `depends_on`.
    pub fn check_template_closure(&self) -> Result<(), String> {
        for step in &self.steps {
            for value in step.parameters.values() {
                if let Some(template) = value.as_template() {
                    if let Some(sid) = template_step_id(template) {
                        if !step.depends_on.contains(sid) {
                            return Err(format!(
                                "step {:?} references {:?} in a template without declaring it as a dependency",
                                step.step_id, sid
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Extract the `<step-id>` portion of a `{{<step-id>.response.<path>}}`
/// template reference.
pub fn template_step_id(template: &str) -> Option<&str> {
    let inner = template.strip_prefix("{{")?.strip_suffix("}}")?;
    inner.split('.').next()
}

/// Result of executing a single [`Step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub agent_name: String,
    pub response: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StepResult {
    pub fn parsed_response(&self) -> serde_json::Value {
        serde_json::from_str(&self.response).unwrap_or(serde_json::Value::Null)
    }
}

/// Aggregate result of executing an entire [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub steps: Vec<StepResult>,
    pub success: bool,
    pub total_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Context handed to the Contextual Re-Resolver (C7) — the full picture of
/// what has happened for a step so far, including prior failed attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub user_query: String,
    pub source_data: HashMap<String, serde_json::Value>,
    pub step_id: String,
    pub capability: String,
    pub attempted_params: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error_response: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    pub retry_count: u32,
    #[serde(default)]
    pub previous_errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cycle() {
        let mut plan = Plan::new("req");
        let mut a = Step::new("a", "agent", "cap");
        a.depends_on.insert("b".into());
        let mut b = Step::new("b", "agent", "cap");
        b.depends_on.insert("a".into());
        plan.steps = vec![a, b];
        assert!(plan.check_acyclic().is_err());
    }

    #[test]
    fn accepts_dag() {
        let mut plan = Plan::new("req");
        let a = Step::new("a", "agent", "cap");
        let mut b = Step::new("b", "agent", "cap");
        b.depends_on.insert("a".into());
        plan.steps = vec![a, b];
        assert!(plan.check_acyclic().is_ok());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut plan = Plan::new("req");
        let mut a = Step::new("a", "agent", "cap");
        a.depends_on.insert("ghost".into());
        plan.steps = vec![a];
        assert!(plan.check_dependency_closure().is_err());
    }

    #[test]
    fn template_step_id_extracts_prefix() {
        assert_eq!(template_step_id("{{step-1.response.price}}"), Some("step-1"));
        assert_eq!(template_step_id("not-a-template"), None);
    }

    #[test]
    fn template_closure_requires_declared_dependency() {
        let mut plan = Plan::new("req");
        let mut b = Step::new("b", "agent", "cap");
        b.parameters.insert(
            "amount".into(),
            ParamValue::Template("{{a.response.amount}}".into()),
        );
        plan.steps = vec![Step::new("a", "agent", "cap"), b];
        assert!(plan.check_template_closure().is_err());

        plan.steps[1].depends_on.insert("a".into());
        assert!(plan.check_template_closure().is_ok());
    }
}
