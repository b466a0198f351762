//! Layer 2 — Micro-Resolver (C5): a narrow LLM call that fills in only the
//! parameters Layer 1 left missing, §4.3.
//!
//! Never overwrites a Layer-1 value (P4) — the caller only passes in the
//! still-missing names, and this layer only ever inserts under those names.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use swarm_kernel::capability::{Capability, ParamMap};
use swarm_kernel::llm::{GenerateOptions, LlmClient};
use tracing::warn;

use crate::json_extract::extract_json_object;

/// Best-effort: an LLM failure or unparsable response leaves `missing`
/// untouched and is logged, never propagated as a fatal error.
pub async fn micro_resolve(
    llm: &dyn LlmClient,
    capability: &Capability,
    missing: &HashSet<String>,
    user_query: &str,
    source_data: &HashMap<String, Value>,
) -> ParamMap {
    if missing.is_empty() {
        return ParamMap::new();
    }

    let prompt = build_prompt(capability, missing, user_query, source_data);
    let response = match llm.generate(&prompt, GenerateOptions::deterministic()).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "micro-resolver LLM call failed, leaving params missing");
            return ParamMap::new();
        }
    };

    let json = match extract_json_object(&response.content) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "micro-resolver response had no parseable JSON object");
            return ParamMap::new();
        }
    };

    let parsed: HashMap<String, Value> = match serde_json::from_str(&json) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "micro-resolver response JSON did not parse to an object");
            return ParamMap::new();
        }
    };

    parsed.into_iter().filter(|(k, _)| missing.contains(k)).collect()
}

fn build_prompt(
    capability: &Capability,
    missing: &HashSet<String>,
    user_query: &str,
    source_data: &HashMap<String, Value>,
) -> String {
    let mut names: Vec<&String> = missing.iter().collect();
    names.sort();
    let param_lines: String = names
        .iter()
        .filter_map(|name| capability.parameters.iter().find(|p| &&p.name == name))
        .map(|p| format!("- {} ({:?}): {}\n", p.name, p.param_type, p.description))
        .collect();

    format!(
        "User request: {user_query}\n\n\
         Capability {}: {}\n\
         Upstream step data so far:\n{}\n\n\
         The following parameters could not be auto-wired and must be inferred:\n{param_lines}\n\
         Return ONLY a JSON object mapping each missing parameter name to its inferred value. \
         If a value truly cannot be inferred, omit that key.",
        capability.name,
        capability.description,
        serde_json::to_string_pretty(source_data).unwrap_or_default(),
    )
}
