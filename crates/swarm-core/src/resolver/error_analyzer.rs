//! Layer 3 — Error Analyzer (C6): HTTP-status pre-filter plus an LLM call
//! for the ambiguous middle ground, §4.3 / §5 B2.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use swarm_kernel::llm::{GenerateOptions, LlmClient, LlmError};
use tracing::warn;

use crate::json_extract::extract_json_object;

/// Routing decision for a failed step response, before any LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRoute {
    /// 401 / 403 / 405 — no amount of parameter correction will help.
    Fatal,
    /// 408 / 429 / 500 / 502 / 504 — a transport-level retry, not this layer.
    TransportRetry,
    /// Everything else, plus a semantic-503 marker — worth asking the LLM.
    Analyze,
}

/// Header name a downstream service can set on a 503 to mark it as a
/// semantic validation failure rather than genuine unavailability (Resolved
/// Open Question 2).
pub const SEMANTIC_VALIDATION_HEADER: &str = "x-semantic-validation";

pub fn classify_status(status: u16, headers: &HashMap<String, String>, body: &str) -> StatusRoute {
    match status {
        401 | 403 | 405 => StatusRoute::Fatal,
        408 | 429 | 500 | 502 | 504 => StatusRoute::TransportRetry,
        503 => {
            if headers.keys().any(|k| k.eq_ignore_ascii_case(SEMANTIC_VALIDATION_HEADER)) || looks_like_semantic_failure(body) {
                StatusRoute::Analyze
            } else {
                StatusRoute::TransportRetry
            }
        }
        _ => StatusRoute::Analyze,
    }
}

/// Body-shape heuristic fallback for services that can't set a custom
/// header: an object carrying both `error` and `validation` (or
/// `invalid_parameters`) keys reads as a semantic rejection, not outage.
fn looks_like_semantic_failure(body: &str) -> bool {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else { return false };
    map.contains_key("error") && (map.contains_key("validation") || map.contains_key("invalid_parameters"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerVerdict {
    pub should_retry: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub suggested_changes: HashMap<String, Value>,
}

pub async fn analyze(
    llm: &dyn LlmClient,
    capability_name: &str,
    attempted_params: &HashMap<String, Value>,
    status: u16,
    error_body: &str,
) -> Result<AnalyzerVerdict, LlmError> {
    let prompt = format!(
        "Capability: {capability_name}\n\
         Parameters attempted: {}\n\
         HTTP status: {status}\n\
         Error body: {error_body}\n\n\
         Decide whether retrying with corrected parameters could plausibly succeed. \
         Return ONLY a JSON object: {{\"should_retry\": bool, \"reason\": \"...\", \
         \"suggested_changes\": {{...}}}}.",
        serde_json::to_string(attempted_params).unwrap_or_default(),
    );

    let response = llm.generate(&prompt, GenerateOptions::deterministic()).await?;
    let json = extract_json_object(&response.content).map_err(LlmError)?;
    serde_json::from_str(&json).map_err(|e| {
        warn!(error = %e, "error analyzer response did not match expected shape");
        LlmError(e.to_string())
    })
}
