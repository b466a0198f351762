//! Capability Provider (C2) — projects the catalog into an LLM-consumable
//! description, §4.1.
//!
//! Two concrete shapes, matching the spec exactly:
//!   - [`LocalProvider`]: renders `FormatForLLM()` directly, or — once the
//!     catalog exceeds `min_tools_for_tiering` — a two-phase tiered
//!     disclosure (summaries first, LLM picks names, full schemas only for
//!     the picks).
//!   - [`ServiceBackedProvider`]: POSTs to a remote semantic-search
//!     endpoint with bounded retry, falling back to a [`LocalProvider`] on
//!     terminal failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use swarm_kernel::capability::{format_capability_block, CapabilityRegistry, CapabilitySummary};
use swarm_kernel::llm::{GenerateOptions, LlmClient};
use swarm_kernel::retry::{retry_with_policy, RetryConfig};
use thiserror::Error;
use tracing::{info, warn};

/// What the Planner actually consumes: the rendered capability description
/// plus the allowed set of agent names the Hallucination Guard checks
/// against (§4.2, I3).
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub description: String,
    pub allowed_agent_names: HashSet<String>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("capability service request failed: {0}")]
    Transport(String),
    #[error("capability service returned an unexpected response: {0}")]
    MalformedResponse(String),
    #[error("capability service failed and fallback is disabled: {0}")]
    NoFallback(String),
}

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn get_description(&self, query: &str) -> Result<ProviderOutput, ProviderError>;
}

/// `Local`: formats the catalog directly, or — above the tiering threshold
/// — runs the two-phase disclosure (§4.1 "Two-phase variant").
pub struct LocalProvider {
    catalog: Arc<dyn CapabilityRegistry>,
    llm: Option<Arc<dyn LlmClient>>,
    tiering_enabled: bool,
    min_tools_for_tiering: usize,
}

impl LocalProvider {
    pub fn new(catalog: Arc<dyn CapabilityRegistry>) -> Self {
        Self { catalog, llm: None, tiering_enabled: false, min_tools_for_tiering: 20 }
    }

    pub fn with_tiering(mut self, llm: Arc<dyn LlmClient>, min_tools_for_tiering: usize) -> Self {
        self.llm = Some(llm);
        self.tiering_enabled = true;
        self.min_tools_for_tiering = min_tools_for_tiering;
        self
    }

    fn total_capability_count(&self) -> usize {
        self.catalog.list_all().iter().map(|s| s.capabilities.iter().filter(|c| !c.internal).count()).sum()
    }

    /// Phase 1: build the short-summary catalog shown to the LLM.
    fn summaries(&self) -> Vec<CapabilitySummary> {
        let mut out = Vec::new();
        for svc in self.catalog.list_all() {
            for cap in &svc.capabilities {
                if cap.internal {
                    continue;
                }
                out.push(CapabilitySummary {
                    agent_name: svc.key(),
                    capability_name: cap.name.clone(),
                    description: cap.description.clone(),
                });
            }
        }
        out.sort_by(|a, b| (a.agent_name.as_str(), a.capability_name.as_str()).cmp(&(b.agent_name.as_str(), b.capability_name.as_str())));
        out
    }

    /// Phase 2: full schema blocks for exactly the selected agent names.
    fn full_description_for(&self, agent_names: &HashSet<String>) -> String {
        let mut out = String::new();
        for svc in self.catalog.list_all() {
            if !agent_names.contains(&svc.key()) {
                continue;
            }
            for cap in &svc.capabilities {
                if cap.internal {
                    continue;
                }
                out.push_str(&format_capability_block(&svc.key(), cap));
            }
        }
        out
    }

    async fn tiered_description(&self, query: &str, llm: &Arc<dyn LlmClient>) -> Result<ProviderOutput, ProviderError> {
        let summaries = self.summaries();
        let listing: String = summaries
            .iter()
            .map(|s| format!("- {}.{}: {}\n", s.agent_name, s.capability_name, s.description))
            .collect();
        let prompt = format!(
            "User request: {query}\n\nAvailable capabilities (name.capability: description):\n{listing}\n\
             List only the agent names (one per line, lowercase, no punctuation) relevant to answering the request."
        );
        let response = llm
            .generate(&prompt, GenerateOptions::deterministic())
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let public_names = self.catalog.public_agent_names();
        let selected: HashSet<String> = response
            .content
            .lines()
            .map(|l| l.trim().trim_start_matches('-').trim().to_lowercase())
            .filter(|l| !l.is_empty() && public_names.contains(l))
            .collect();

        if selected.is_empty() {
            warn!("tiered capability selection returned no known agent names; falling back to full catalog");
            return Ok(ProviderOutput { description: self.catalog.format_for_llm(), allowed_agent_names: public_names });
        }

        Ok(ProviderOutput { description: self.full_description_for(&selected), allowed_agent_names: selected })
    }
}

#[async_trait]
impl CapabilityProvider for LocalProvider {
    async fn get_description(&self, query: &str) -> Result<ProviderOutput, ProviderError> {
        if self.tiering_enabled && self.total_capability_count() >= self.min_tools_for_tiering {
            if let Some(llm) = &self.llm {
                return self.tiered_description(query, llm).await;
            }
        }
        Ok(ProviderOutput { description: self.catalog.format_for_llm(), allowed_agent_names: self.catalog.public_agent_names() })
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: u32,
    threshold: f32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    formatted_info: String,
    tool_ids: Vec<String>,
}

/// `Service-backed`: POSTs to a remote semantic-search endpoint; three
/// attempts with exponential backoff, then optional fallback to Local.
pub struct ServiceBackedProvider {
    client: reqwest::Client,
    endpoint: String,
    top_k: u32,
    threshold: f32,
    enable_fallback: bool,
    fallback: LocalProvider,
}

impl ServiceBackedProvider {
    pub fn new(endpoint: impl Into<String>, fallback: LocalProvider) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            top_k: 10,
            threshold: 0.5,
            enable_fallback: true,
            fallback,
        }
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        let config = RetryConfig::exponential(3, 200, 2_000);
        let body = SearchRequest { query, top_k: self.top_k, threshold: self.threshold };
        retry_with_policy(
            &config,
            |_: &ProviderError| true,
            || async {
                let resp = self
                    .client
                    .post(&self.endpoint)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ProviderError::Transport(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(ProviderError::Transport(format!("status {}", resp.status())));
                }
                resp.json::<SearchResponse>().await.map_err(|e| ProviderError::MalformedResponse(e.to_string()))
            },
        )
        .await
    }
}

#[async_trait]
impl CapabilityProvider for ServiceBackedProvider {
    async fn get_description(&self, query: &str) -> Result<ProviderOutput, ProviderError> {
        match self.search(query).await {
            Ok(resp) => Ok(ProviderOutput {
                description: resp.formatted_info,
                allowed_agent_names: resp.tool_ids.into_iter().map(|s| s.to_lowercase()).collect(),
            }),
            Err(e) if self.enable_fallback => {
                info!("capability service exhausted retries ({e}); falling back to local catalog");
                self.fallback.get_description(query).await
            }
            Err(e) => Err(ProviderError::NoFallback(e.to_string())),
        }
    }
}
