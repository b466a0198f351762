//! Typed configuration loaded from environment variables (§6 env var list).
//!
//! Scoped to env-var parsing only, following `mofa_kernel::config`'s
//! `ConfigError`/`ConfigResult` naming — no generic multi-format file
//! loader (that is an explicit non-goal).

use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn env_bool(var: &'static str, default: bool) -> ConfigResult<bool> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue { var, value: v }),
        },
    }
}

fn env_usize(var: &'static str, default: usize) -> ConfigResult<usize> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { var, value: v }),
    }
}

fn env_u64(var: &'static str, default: u64) -> ConfigResult<u64> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { var, value: v }),
    }
}

fn env_string(var: &'static str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn env_set(var: &'static str) -> HashSet<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

/// Delivery semantics for the expiry processor's callback (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDelivery {
    AtMostOnce,
    AtLeastOnce,
}

/// What a streaming request's checkpoint does on expiry (§4.5). A streaming
/// caller is typically already disconnected, so `ImplicitDeny` leaves the
/// checkpoint's status as a no-op `expired` rather than applying an action
/// nobody is listening for; `ApplyDefault` treats it the same as a
/// non-streaming checkpoint. Non-streaming checkpoints always apply their
/// default action regardless of this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingExpiryBehavior {
    ImplicitDeny,
    ApplyDefault,
}

#[derive(Debug, Clone)]
pub struct HitlConfig {
    pub enabled: bool,
    pub require_plan_approval: bool,
    pub sensitive_agents: HashSet<String>,
    pub sensitive_capabilities: HashSet<String>,
    pub default_timeout: Duration,
    pub default_action: swarm_kernel::checkpoint::DefaultAction,
    pub escalate_after_failures: u32,
    pub expiry_enabled: bool,
    pub expiry_scan_interval: Duration,
    pub expiry_batch_size: usize,
    pub expiry_delivery: ExpiryDelivery,
    pub streaming_expiry_behavior: StreamingExpiryBehavior,
}

/// Top-level config read from the environment, matching the `GOMIND_*`-shaped
/// list in §6 (renamed to this engine's own `SWARM_` prefix).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub agent_name: String,
    pub orchestration_timeout: Duration,
    pub capability_service_url: Option<String>,

    pub plan_retry_enabled: bool,
    pub plan_parse_max_retries: usize,

    pub hallucination_validation_enabled: bool,
    pub hallucination_retry_enabled: bool,
    pub hallucination_max_retries: usize,

    pub semantic_retry_enabled: bool,
    pub semantic_retry_max_attempts: usize,
    pub semantic_retry_independent_steps: bool,
    pub max_validation_retries: usize,

    pub tiered_resolution_enabled: bool,
    pub tiered_min_tools: usize,

    pub max_concurrency: usize,
    pub step_timeout: Duration,
    pub retry_attempts: usize,
    pub retry_delay: Duration,

    pub hitl: HitlConfig,

    pub history_size: usize,
}

impl OrchestratorConfig {
    pub fn from_env() -> ConfigResult<Self> {
        let default_action = match env_string("SWARM_HITL_DEFAULT_ACTION", "reject").as_str() {
            "approve" => swarm_kernel::checkpoint::DefaultAction::Approve,
            "abort" => swarm_kernel::checkpoint::DefaultAction::Abort,
            _ => swarm_kernel::checkpoint::DefaultAction::Reject,
        };
        let expiry_delivery = match env_string("SWARM_HITL_EXPIRY_DELIVERY", "at_most_once").as_str() {
            "at_least_once" => ExpiryDelivery::AtLeastOnce,
            _ => ExpiryDelivery::AtMostOnce,
        };
        let streaming_expiry_behavior = match env_string("SWARM_HITL_STREAMING_EXPIRY_BEHAVIOR", "implicit_deny").as_str() {
            "apply_default" => StreamingExpiryBehavior::ApplyDefault,
            _ => StreamingExpiryBehavior::ImplicitDeny,
        };

        Ok(Self {
            agent_name: env_string("SWARM_AGENT_NAME", "orchestrator"),
            orchestration_timeout: Duration::from_secs(env_u64("SWARM_ORCHESTRATION_TIMEOUT", 120)?),
            capability_service_url: std::env::var("SWARM_CAPABILITY_SERVICE_URL").ok(),

            plan_retry_enabled: env_bool("SWARM_PLAN_RETRY_ENABLED", true)?,
            plan_parse_max_retries: env_usize("SWARM_PLAN_RETRY_MAX", 2)?,

            hallucination_validation_enabled: env_bool("SWARM_HALLUCINATION_VALIDATION_ENABLED", true)?,
            hallucination_retry_enabled: env_bool("SWARM_HALLUCINATION_RETRY_ENABLED", true)?,
            hallucination_max_retries: env_usize("SWARM_HALLUCINATION_MAX_RETRIES", 1)?,

            semantic_retry_enabled: env_bool("SWARM_SEMANTIC_RETRY_ENABLED", true)?,
            semantic_retry_max_attempts: env_usize("SWARM_SEMANTIC_RETRY_MAX_ATTEMPTS", 2)?,
            semantic_retry_independent_steps: env_bool("SWARM_SEMANTIC_RETRY_INDEPENDENT_STEPS", false)?,
            max_validation_retries: env_usize("SWARM_MAX_VALIDATION_RETRIES", 2)?,

            tiered_resolution_enabled: env_bool("SWARM_TIERED_RESOLUTION_ENABLED", true)?,
            tiered_min_tools: env_usize("SWARM_TIERED_MIN_TOOLS", 20)?,

            max_concurrency: env_usize("SWARM_MAX_CONCURRENCY", 5)?,
            step_timeout: Duration::from_secs(env_u64("SWARM_STEP_TIMEOUT_SECS", 30)?),
            retry_attempts: env_usize("SWARM_RETRY_ATTEMPTS", 2)?,
            retry_delay: Duration::from_secs(env_u64("SWARM_RETRY_DELAY_SECS", 2)?),

            hitl: HitlConfig {
                enabled: env_bool("SWARM_HITL_ENABLED", false)?,
                require_plan_approval: env_bool("SWARM_HITL_REQUIRE_PLAN_APPROVAL", false)?,
                sensitive_agents: env_set("SWARM_HITL_SENSITIVE_AGENTS"),
                sensitive_capabilities: env_set("SWARM_HITL_SENSITIVE_CAPABILITIES"),
                default_timeout: Duration::from_secs(env_u64("SWARM_HITL_DEFAULT_TIMEOUT", 300)?),
                default_action,
                escalate_after_failures: env_u64("SWARM_HITL_ESCALATE_AFTER_FAILURES", 3)? as u32,
                expiry_enabled: env_bool("SWARM_HITL_EXPIRY_ENABLED", true)?,
                expiry_scan_interval: Duration::from_secs(env_u64("SWARM_HITL_EXPIRY_INTERVAL", 10)?.max(1)),
                expiry_batch_size: env_usize("SWARM_HITL_EXPIRY_BATCH_SIZE", 100)?.min(10_000),
                expiry_delivery,
                streaming_expiry_behavior,
            },

            history_size: env_usize("SWARM_HISTORY_SIZE", 100)?,
        })
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        // Delegates to `from_env`, so this still reads `SWARM_*` variables —
        // it only differs from calling `from_env()` directly in panicking on
        // a malformed value instead of surfacing a `ConfigError`.
        Self::from_env().expect("default config never fails to parse")
    }
}
