//! Four-layer Parameter Resolver (C4-C7), §4.3.
//!
//! Layers run top-down on each attempt. P4: a value Layer 1 (Auto-Wirer)
//! resolved is never overwritten by Layers 2-4 — this module is the one
//! place that invariant is enforced, by tracking which keys came from
//! auto-wiring and filtering every later layer's output against that set.
//! "Auto-wired" here means genuinely discovered by scanning a prior step's
//! response data, not a value the step's own plan already declared (see
//! `auto_wire::auto_wire`'s return type) — a declared placeholder such as
//! `amount: 0` is the plan's own guess and stays correctable.

pub mod auto_wire;
pub mod context_reresolver;
pub mod error_analyzer;
pub mod micro;

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use swarm_kernel::capability::{Capability, ParamMap};
use swarm_kernel::llm::LlmClient;
use swarm_kernel::plan::{ExecutionContext, ParamValue};
use tracing::info;

pub use context_reresolver::{ReResolverConfig, ReResolverVerdict};
pub use error_analyzer::{AnalyzerVerdict, StatusRoute};

/// Parameters resolved so far for a step, plus which keys are locked by P4.
#[derive(Debug, Clone, Default)]
pub struct ResolvedParams {
    pub params: ParamMap,
    auto_wired_keys: HashSet<String>,
}

impl ResolvedParams {
    fn lock(&mut self, key: &str) {
        self.auto_wired_keys.insert(key.to_string());
    }

    /// Merge `updates` in, skipping any key already locked by Layer 1.
    fn merge_unlocked(&mut self, updates: ParamMap) {
        for (k, v) in updates {
            if self.auto_wired_keys.contains(&k) {
                info!(param = %k, "ignoring later-layer value, key is locked by auto-wiring (P4)");
                continue;
            }
            self.params.insert(k, v);
        }
    }
}

/// Layers 1 + 2: runs before the first dispatch attempt of a step.
pub async fn resolve_initial(
    llm: &dyn LlmClient,
    capability: &Capability,
    declared: &HashMap<String, ParamValue>,
    user_query: &str,
    source_data: &HashMap<String, Value>,
) -> ResolvedParams {
    let (auto_wired, missing, locked_keys) = auto_wire::auto_wire(capability, declared, source_data);

    let mut resolved = ResolvedParams::default();
    for key in &locked_keys {
        resolved.lock(key);
    }
    resolved.params = auto_wired;

    if !missing.is_empty() {
        let filled = micro::micro_resolve(llm, capability, &missing, user_query, source_data).await;
        resolved.merge_unlocked(filled);
    }

    resolved
}

/// Layers 3 + 4: runs after a failed dispatch attempt. Returns `Some` with
/// corrected params when a retry is worth attempting, `None` when this
/// attempt should be treated as terminal for this step.
///
/// `layer3_attempts` is an independent counter owned by the caller across the
/// whole step — Layer 3 (the Error Analyzer) is only invoked while it is
/// below `max_validation_retries`, per P3's "Layer 3 is bounded by
/// max-validation-retries" apart from Layer 4's own `max_attempts` bound.
#[allow(clippy::too_many_arguments)]
pub async fn refine_after_error(
    llm: &dyn LlmClient,
    resolved: &mut ResolvedParams,
    re_resolver_config: &ReResolverConfig,
    capability_name: &str,
    status: u16,
    headers: &HashMap<String, String>,
    error_body: &str,
    ctx: &ExecutionContext,
    layer3_attempts: &mut usize,
    max_validation_retries: usize,
) -> RefinementOutcome {
    match error_analyzer::classify_status(status, headers, error_body) {
        StatusRoute::Fatal => return RefinementOutcome::Fatal,
        StatusRoute::TransportRetry => return RefinementOutcome::DelegateToTransportRetry,
        StatusRoute::Analyze => {}
    }

    if *layer3_attempts < max_validation_retries {
        *layer3_attempts += 1;
        if let Ok(AnalyzerVerdict { should_retry: true, suggested_changes, .. }) =
            error_analyzer::analyze(llm, capability_name, &resolved.params, status, error_body).await
        {
            if !suggested_changes.is_empty() {
                resolved.merge_unlocked(suggested_changes);
                return RefinementOutcome::Retry;
            }
        }
    }

    // Layer 3 either gave up, had nothing to suggest, or is already at its
    // own cap — Layer 4 still gets a shot at it, per the spec's "invoked iff
    // Layer 3 returned should-retry=false" handoff, bounded independently by
    // its own `max_attempts`.
    if !context_reresolver::is_eligible(re_resolver_config, ctx) {
        return RefinementOutcome::GiveUp;
    }

    match context_reresolver::reresolve(llm, ctx).await {
        Ok(ReResolverVerdict { should_retry: true, corrected_parameters, .. }) if !corrected_parameters.is_empty() => {
            resolved.merge_unlocked(corrected_parameters);
            RefinementOutcome::Retry
        }
        _ => RefinementOutcome::GiveUp,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementOutcome {
    Retry,
    GiveUp,
    Fatal,
    DelegateToTransportRetry,
}
