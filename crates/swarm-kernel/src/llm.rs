//! Opaque LLM client contract (§6 "Interfaces consumed").
//!
//! `spec.md` deliberately reduces the LLM client to a single
//! `Generate(prompt, options) -> {content, token-usage}` call; this mirrors
//! the kernel-only-defines-the-trait split of `mofa_kernel::llm::provider`
//! (`LLMProvider`), except scoped to the one operation the core actually
//! needs. Prompt text itself is out of scope (Non-goals, §1).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl GenerateOptions {
    /// "Deterministic temperature for structural outputs" (§4.2).
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
}

/// A generic, transport-agnostic failure from the LLM client. The core
/// never interprets the cause beyond "the call failed" — retries and
/// fallbacks around it are the core's responsibility, not this trait's.
#[derive(Debug, thiserror::Error)]
#[error("llm generation failed: {0}")]
pub struct LlmError(pub String);

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: GenerateOptions,
    ) -> Result<GenerateResponse, LlmError>;
}
