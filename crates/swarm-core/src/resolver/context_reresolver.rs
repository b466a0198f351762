//! Layer 4 — Contextual Re-Resolver (C7): full `ExecutionContext`-driven
//! correction, §4.3.
//!
//! Gated on `semantic_retry.enabled` and on either dependency source data
//! being present or `enable_for_independent_steps`, bounded by
//! `max_attempts` (default 2). `previous_errors` accumulates across
//! attempts so this layer never re-proposes a value it already tried.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use swarm_kernel::llm::{GenerateOptions, LlmClient, LlmError};
use swarm_kernel::plan::ExecutionContext;

use crate::json_extract::extract_json_object;

#[derive(Debug, Clone)]
pub struct ReResolverConfig {
    pub enabled: bool,
    pub max_attempts: usize,
    pub enable_for_independent_steps: bool,
}

impl Default for ReResolverConfig {
    fn default() -> Self {
        Self { enabled: true, max_attempts: 2, enable_for_independent_steps: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReResolverVerdict {
    pub should_retry: bool,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub corrected_parameters: HashMap<String, Value>,
}

/// Whether Layer 4 is allowed to run at all for this context: the
/// `enabled` switch, the attempt budget, and the dependency-data gate.
pub fn is_eligible(config: &ReResolverConfig, ctx: &ExecutionContext) -> bool {
    if !config.enabled {
        return false;
    }
    if ctx.retry_count as usize >= config.max_attempts {
        return false;
    }
    !ctx.source_data.is_empty() || config.enable_for_independent_steps
}

pub async fn reresolve(llm: &dyn LlmClient, ctx: &ExecutionContext) -> Result<ReResolverVerdict, LlmError> {
    let prompt = build_prompt(ctx);
    let response = llm.generate(&prompt, GenerateOptions::deterministic()).await?;
    let json = extract_json_object(&response.content).map_err(LlmError)?;
    serde_json::from_str(&json).map_err(|e| LlmError(e.to_string()))
}

fn build_prompt(ctx: &ExecutionContext) -> String {
    let previous: String = if ctx.previous_errors.is_empty() {
        "none".to_string()
    } else {
        ctx.previous_errors.join("; ")
    };
    format!(
        "User query: {}\n\
         Step: {} (capability: {})\n\
         Parameters attempted this round: {}\n\
         HTTP status: {:?}\n\
         Error response: {:?}\n\
         Upstream step data: {}\n\
         Previously tried and rejected corrections: {previous}\n\n\
         Decide whether the step is worth retrying with corrected parameters. Never repeat a \
         correction already listed as previously tried and rejected. Return ONLY a JSON object: \
         {{\"should_retry\": bool, \"analysis\": \"...\", \"corrected_parameters\": {{...}}}}.",
        ctx.user_query,
        ctx.step_id,
        ctx.capability,
        serde_json::to_string(&ctx.attempted_params).unwrap_or_default(),
        ctx.http_status,
        ctx.error_response,
        serde_json::to_string(&ctx.source_data).unwrap_or_default(),
    )
}
