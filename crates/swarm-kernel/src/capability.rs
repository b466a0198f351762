//! Capability / Service data model and the kernel-level registry contract.
//!
//! Mirrors the split in `mofa_kernel::gateway`: this module defines the
//! *shape* of a capability catalog entry and the trait a concrete catalog
//! must implement. `swarm-core::catalog` provides the one real
//! implementation (an `RwLock`-guarded map refreshed from `Discovery`
//! snapshots).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// JSON-schema-ish type tag for a capability parameter (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    /// Whether a JSON value matches this schema type without any coercion.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value as V;
        match (self, value) {
            (ParameterType::String, V::String(_)) => true,
            (ParameterType::Number, V::Number(_)) => true,
            (ParameterType::Integer, V::Number(n)) => n.is_i64() || n.is_u64(),
            (ParameterType::Boolean, V::Bool(_)) => true,
            (ParameterType::Array, V::Array(_)) => true,
            (ParameterType::Object, V::Object(_)) => true,
            _ => false,
        }
    }

    /// Whether this type is a JSON scalar (string/number/integer/boolean).
    pub fn is_scalar(&self) -> bool {
        !matches!(self, ParameterType::Array | ParameterType::Object)
    }
}

/// A single declared parameter of a [`Capability`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType, required: bool) -> Self {
        Self {
            name: name.into(),
            param_type,
            required,
            description: String::new(),
            example: None,
        }
    }
}

/// A typed, named, HTTP-callable operation exposed by a [`Service`].
///
/// `internal = true` means the capability is still HTTP-callable but MUST
/// be excluded from planner prompts (P7 — used to break orchestrator
/// self-reference, see Design Notes §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub endpoint_path: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub internal: bool,
}

impl Capability {
    pub fn new(name: impl Into<String>, endpoint_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            endpoint_path: endpoint_path.into(),
            parameters: Vec::new(),
            internal: false,
        }
    }

    pub fn with_parameter(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.required)
    }
}

/// A registered service: an address/port pair exposing zero or more
/// capabilities. Lookup is always by lowercased `name` (§3: "the core
/// treats names as case-insensitive identifiers throughout").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Service {
    /// Lowercased name — the canonical key used for every lookup.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn has_public_capability(&self) -> bool {
        self.capabilities.iter().any(|c| !c.internal)
    }

    pub fn find_capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("service {0:?} is already registered")]
    DuplicateService(String),
    #[error("service {0:?} not found")]
    NotFound(String),
}

/// Kernel contract for the capability catalog (C1).
///
/// Implementations store [`Service`]s keyed by lowercased name and expose
/// the read operations the planner / provider / hallucination guard need.
/// No mutation happens through shared references — registrations replace
/// the whole snapshot, matching how discovery refreshes are periodic and
/// atomic rather than incremental (§3 "Lifecycle").
pub trait CapabilityRegistry: Send + Sync {
    /// Replace the catalog with a fresh discovery snapshot.
    fn replace_snapshot(&self, services: Vec<Service>);

    /// Look up a service by name, case-insensitively.
    fn lookup(&self, name: &str) -> Option<Service>;

    /// All registered services.
    fn list_all(&self) -> Vec<Service>;

    /// Lowercased names of services that expose at least one non-internal
    /// capability (`GetPublicAgentNames`).
    fn public_agent_names(&self) -> std::collections::HashSet<String>;

    /// Human-readable listing of every non-internal capability, its
    /// parameter schema, and its description (`FormatForLLM`). P7: no
    /// `internal = true` capability may appear here.
    fn format_for_llm(&self) -> String;
}

/// Summary line used by the two-phase tiered provider (phase 1: names +
/// one-line description only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySummary {
    pub agent_name: String,
    pub capability_name: String,
    pub description: String,
}

/// Render a single capability's full schema block, the shared formatting
/// primitive `format_for_llm` implementations build on.
pub fn format_capability_block(agent_name: &str, cap: &Capability) -> String {
    let mut out = format!("- {}.{}: {}\n", agent_name, cap.name, cap.description);
    for p in &cap.parameters {
        out.push_str(&format!(
            "    - {} ({:?}{}): {}\n",
            p.name,
            p.param_type,
            if p.required { ", required" } else { "" },
            p.description
        ));
    }
    out
}

pub type ParamMap = HashMap<String, serde_json::Value>;
