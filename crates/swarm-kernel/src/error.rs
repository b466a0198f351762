//! Crate-level error type and the wire-form error taxonomy from §6.
//!
//! [`ErrorCode`] is what callers outside the process see (it appears in an
//! `OrchestratorResponse`'s `errors[]`); [`KernelError`] is the Rust-side
//! error composed from every sub-module via `#[from]`, mirroring
//! `mofa_kernel::error::KernelError`.

use thiserror::Error;

/// Wire-form error codes a caller can match on. Kept as a string-backed
/// enum (not a bare `&'static str`) so every layer constructs the same
/// fixed vocabulary instead of ad hoc strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AgentTimeout,
    AgentUnavailable,
    AgentError,
    SynthesisFailure,
    RoutingFailure,
    CircuitBreakerOpen,
    MaxRetriesReached,
    HandlerError,
    TaskTimeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AgentTimeout => "AGENT_TIMEOUT",
            ErrorCode::AgentUnavailable => "AGENT_UNAVAILABLE",
            ErrorCode::AgentError => "AGENT_ERROR",
            ErrorCode::SynthesisFailure => "SYNTHESIS_FAILURE",
            ErrorCode::RoutingFailure => "ROUTING_FAILURE",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::MaxRetriesReached => "MAX_RETRIES_REACHED",
            ErrorCode::HandlerError => "HANDLER_ERROR",
            ErrorCode::TaskTimeout => "TASK_TIMEOUT",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-level error type. Every sub-module's error converts into this via
/// `#[from]` so `?` composes across layers; the `code()` accessor maps each
/// variant onto the wire taxonomy for the final `OrchestratorResponse`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    #[error("plan invalid: {0}")]
    InvalidPlan(String),

    #[error("agent {0:?} is not resolvable against the capability catalog")]
    HallucinatedAgent(String),

    #[error("routing failure: {0}")]
    Routing(String),

    #[error("step {step_id} timed out after {duration_ms}ms")]
    StepTimeout { step_id: String, duration_ms: u64 },

    #[error("step {step_id} agent unavailable: {reason}")]
    AgentUnavailable { step_id: String, reason: String },

    #[error("step {step_id} failed: {reason}")]
    AgentError { step_id: String, reason: String },

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    #[error("max retries reached for step {0}")]
    MaxRetriesReached(String),

    #[error("handler panicked: {0}")]
    HandlerError(String),

    #[error("task {0} timed out")]
    TaskTimeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KernelError {
    pub fn step_timeout(step_id: impl Into<String>, duration_ms: u64) -> Self {
        KernelError::StepTimeout { step_id: step_id.into(), duration_ms }
    }

    pub fn agent_unavailable(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        KernelError::AgentUnavailable { step_id: step_id.into(), reason: reason.into() }
    }

    pub fn agent_error(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        KernelError::AgentError { step_id: step_id.into(), reason: reason.into() }
    }

    /// Map this error onto the fixed wire-form taxonomy from §6.
    pub fn code(&self) -> ErrorCode {
        match self {
            KernelError::InvalidPlan(_)
            | KernelError::HallucinatedAgent(_)
            | KernelError::Routing(_) => ErrorCode::RoutingFailure,
            KernelError::StepTimeout { .. } => ErrorCode::AgentTimeout,
            KernelError::AgentUnavailable { .. } => ErrorCode::AgentUnavailable,
            KernelError::AgentError { .. } => ErrorCode::AgentError,
            KernelError::Synthesis(_) => ErrorCode::SynthesisFailure,
            KernelError::CircuitBreakerOpen(_) => ErrorCode::CircuitBreakerOpen,
            KernelError::MaxRetriesReached(_) => ErrorCode::MaxRetriesReached,
            KernelError::HandlerError(_) => ErrorCode::HandlerError,
            KernelError::TaskTimeout(_) => ErrorCode::TaskTimeout,
            KernelError::Serialization(_) | KernelError::Internal(_) => ErrorCode::RoutingFailure,
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
