//! Discovery service contract (§6 "Interfaces consumed").
//!
//! The discovery protocol itself is out of scope; the core only needs a
//! single opaque lookup. Whatever backs this (DNS-SD, a registry service,
//! a static file) lives outside this crate.

use async_trait::async_trait;
use swarm_kernel::capability::Service;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub tags: Vec<String>,
}

#[derive(Debug, Error)]
#[error("discovery failed: {0}")]
pub struct DiscoveryError(pub String);

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, filter: &DiscoveryFilter) -> Result<Vec<Service>, DiscoveryError>;
}

/// Trivial discovery backed by a fixed, caller-supplied set of services —
/// useful for embedding the core without a real registry, and for tests.
pub struct StaticDiscovery {
    services: Vec<Service>,
}

impl StaticDiscovery {
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, _filter: &DiscoveryFilter) -> Result<Vec<Service>, DiscoveryError> {
        Ok(self.services.clone())
    }
}
