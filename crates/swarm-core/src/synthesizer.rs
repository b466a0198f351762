//! Synthesizer (C11) — reduces step outputs into a final textual answer,
//! §4.6.

use async_trait::async_trait;
use swarm_kernel::llm::{GenerateOptions, LlmClient};
use swarm_kernel::plan::{ExecutionResult, StepResult};
use swarm_kernel::{KernelError, KernelResult};
use tracing::{instrument, warn};

/// Best-effort record of a synthesis LLM interaction, keyed by request id
/// (§4.6 "recording ... correlated by request-id obtained from trace
/// baggage"). A failure to record is logged, never propagated.
#[async_trait]
pub trait LlmDebugStore: Send + Sync {
    async fn record_synthesis(&self, request_id: &str, prompt: &str, response: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynthesisStrategy {
    #[default]
    Llm,
    Template,
    Simple,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesizerConfig {
    pub strategy: SynthesisStrategy,
}

pub struct Synthesizer {
    llm: std::sync::Arc<dyn LlmClient>,
    config: SynthesizerConfig,
    debug_store: Option<std::sync::Arc<dyn LlmDebugStore>>,
}

impl Synthesizer {
    pub fn new(llm: std::sync::Arc<dyn LlmClient>, config: SynthesizerConfig) -> Self {
        Self { llm, config, debug_store: None }
    }

    pub fn with_debug_store(mut self, store: std::sync::Arc<dyn LlmDebugStore>) -> Self {
        self.debug_store = Some(store);
        self
    }

    #[instrument(skip(self, result), fields(strategy = ?self.config.strategy, steps = result.steps.len()))]
    pub async fn synthesize(&self, user_request: &str, request_id: &str, result: &ExecutionResult) -> KernelResult<String> {
        match self.config.strategy {
            SynthesisStrategy::Llm => self.synthesize_llm(user_request, request_id, result).await,
            SynthesisStrategy::Template => Ok(synthesize_template(result)),
            SynthesisStrategy::Simple => Ok(synthesize_simple(result)),
        }
    }

    async fn synthesize_llm(&self, user_request: &str, request_id: &str, result: &ExecutionResult) -> KernelResult<String> {
        let prompt = build_llm_prompt(user_request, result);
        let response = self
            .llm
            .generate(&prompt, GenerateOptions::deterministic())
            .await
            .map_err(|e| KernelError::Synthesis(e.to_string()))?;

        if let Some(store) = &self.debug_store {
            if let Err(e) = store.record_synthesis(request_id, &prompt, &response.content).await {
                warn!(request_id, error = %e, "failed to record synthesis debug entry");
            }
        }

        Ok(response.content)
    }
}

fn build_llm_prompt(user_request: &str, result: &ExecutionResult) -> String {
    let mut out = format!("User request: {user_request}\n\nStep results:\n");
    for step in &result.steps {
        out.push_str(&format!("- {}: ", step.step_id));
        if step.success {
            out.push_str(&format!("{}\n", pretty_or_raw(&step.response)));
        } else {
            out.push_str(&format!("FAILED ({})\n", step.error.as_deref().unwrap_or("unknown error")));
        }
    }
    out.push_str(
        "\nWrite a single, direct answer to the user's request using the successful step results. \
         Route around any failed steps rather than mentioning them unless they block the answer entirely.",
    );
    out
}

fn pretty_or_raw(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

fn synthesize_template(result: &ExecutionResult) -> String {
    let mut out = String::new();
    for step in &result.steps {
        if step.success {
            out.push_str(&format!("[{}]\n{}\n\n", step.step_id, pretty_or_raw(&step.response)));
        } else {
            out.push_str(&format!("[{}] failed: {}\n\n", step.step_id, step.error.as_deref().unwrap_or("unknown error")));
        }
    }
    out.trim_end().to_string()
}

fn synthesize_simple(result: &ExecutionResult) -> String {
    successful_bodies(result).join("\n")
}

fn successful_bodies(result: &ExecutionResult) -> Vec<&str> {
    result.steps.iter().filter(|s| s.success).map(|s: &StepResult| s.response.as_str()).collect()
}
