//! Concrete Capability Catalog (C1).
//!
//! An `RwLock`-guarded map refreshed wholesale from `Discovery` snapshots,
//! matching the read-mostly-map-with-periodic-replace lifecycle from §3
//! ("Capability entries come from discovery snapshots refreshed
//! periodically"). Lock-scoping follows
//! `mofa-foundation::coordination::scheduler::PriorityScheduler`: every
//! method acquires the lock, does its work, and releases it before
//! returning — none of these methods hold the guard across an `.await`
//! because none of them need to.

use parking_lot::RwLock;
use std::collections::HashMap;
use swarm_kernel::capability::{format_capability_block, CapabilityRegistry, Service};

/// In-memory catalog keyed by lowercased service name (§3, §4.1).
pub struct InMemoryCatalog {
    services: RwLock<HashMap<String, Service>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self { services: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry for InMemoryCatalog {
    fn replace_snapshot(&self, services: Vec<Service>) {
        let mut map = HashMap::with_capacity(services.len());
        for svc in services {
            map.insert(svc.key(), svc);
        }
        *self.services.write() = map;
    }

    fn lookup(&self, name: &str) -> Option<Service> {
        self.services.read().get(&name.to_lowercase()).cloned()
    }

    fn list_all(&self) -> Vec<Service> {
        self.services.read().values().cloned().collect()
    }

    fn public_agent_names(&self) -> std::collections::HashSet<String> {
        self.services
            .read()
            .values()
            .filter(|svc| svc.has_public_capability())
            .map(|svc| svc.key())
            .collect()
    }

    /// P7: internal capabilities never appear here.
    fn format_for_llm(&self) -> String {
        let services = self.services.read();
        let mut names: Vec<&String> = services.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            let svc = &services[name];
            for cap in &svc.capabilities {
                if cap.internal {
                    continue;
                }
                out.push_str(&format_capability_block(&svc.key(), cap));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_kernel::capability::Capability;

    fn svc(name: &str, caps: Vec<Capability>) -> Service {
        Service { id: name.into(), name: name.into(), address: "127.0.0.1".into(), port: 9000, capabilities: caps }
    }

    #[test]
    fn internal_capability_excluded_from_format_for_llm() {
        let catalog = InMemoryCatalog::new();
        catalog.replace_snapshot(vec![svc(
            "orchestrator",
            vec![
                Capability::new("orchestrate_natural", "/x").internal(),
                Capability::new("weather", "/weather"),
            ],
        )]);
        let rendered = catalog.format_for_llm();
        assert!(!rendered.contains("orchestrate_natural"));
        assert!(rendered.contains("weather"));
    }

    #[test]
    fn public_agent_names_excludes_all_internal_services() {
        let catalog = InMemoryCatalog::new();
        catalog.replace_snapshot(vec![
            svc("calculator", vec![Capability::new("multiply", "/m")]),
            svc("orchestrator", vec![Capability::new("orchestrate_natural", "/x").internal()]),
        ]);
        let names = catalog.public_agent_names();
        assert!(names.contains("calculator"));
        assert!(!names.contains("orchestrator"));
    }

    #[test]
    fn lookup_is_case_insensitive_via_lowercased_key() {
        let catalog = InMemoryCatalog::new();
        catalog.replace_snapshot(vec![svc("Stock-Quote", vec![])]);
        assert!(catalog.lookup("STOCK-QUOTE").is_some());
        assert!(catalog.lookup("stock-quote").is_some());
    }

    #[test]
    fn replace_snapshot_drops_stale_entries() {
        let catalog = InMemoryCatalog::new();
        catalog.replace_snapshot(vec![svc("old", vec![])]);
        catalog.replace_snapshot(vec![svc("new", vec![])]);
        assert!(catalog.lookup("old").is_none());
        assert!(catalog.lookup("new").is_some());
    }
}
