//! Orchestrator metrics: request/agent-call/synthesis counters plus a
//! latency percentile estimator, backing `GetMetrics` (§6). Grounded on
//! `mofa-foundation::metrics::MetricsCollector`'s per-entry counter style,
//! generalized from a typed backend trait to a single orchestrator-shaped
//! collector since the orchestrator has one fixed set of counters to track.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// How many recent step latencies to retain for percentile estimation.
/// Older samples are evicted FIFO; this bounds memory instead of keeping an
/// unbounded history.
const LATENCY_WINDOW: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct LatencyPercentiles {
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub agent_calls: HashMap<String, u64>,
    pub synthesis_success: u64,
    pub synthesis_failed: u64,
    pub latency_percentiles: LatencyPercentiles,
}

pub struct OrchestratorMetrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    synthesis_success: AtomicU64,
    synthesis_failed: AtomicU64,
    agent_calls: RwLock<HashMap<String, u64>>,
    latencies_ms: RwLock<VecDeque<u64>>,
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_success: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            synthesis_success: AtomicU64::new(0),
            synthesis_failed: AtomicU64::new(0),
            agent_calls: RwLock::new(HashMap::new()),
            latencies_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    pub async fn record_request(&self, success: bool, duration_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(duration_ms).await;
    }

    pub async fn record_agent_call(&self, agent_name: &str) {
        let mut calls = self.agent_calls.write().await;
        *calls.entry(agent_name.to_string()).or_insert(0) += 1;
    }

    pub fn record_synthesis(&self, success: bool) {
        if success {
            self.synthesis_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.synthesis_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn record_latency(&self, duration_ms: u64) {
        let mut latencies = self.latencies_ms.write().await;
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(duration_ms);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            agent_calls: self.agent_calls.read().await.clone(),
            synthesis_success: self.synthesis_success.load(Ordering::Relaxed),
            synthesis_failed: self.synthesis_failed.load(Ordering::Relaxed),
            latency_percentiles: self.percentiles().await,
        }
    }

    async fn percentiles(&self) -> LatencyPercentiles {
        let mut samples: Vec<u64> = self.latencies_ms.read().await.iter().copied().collect();
        if samples.is_empty() {
            return LatencyPercentiles::default();
        }
        samples.sort_unstable();
        LatencyPercentiles {
            p50_ms: percentile_of(&samples, 0.50),
            p90_ms: percentile_of(&samples, 0.90),
            p95_ms: percentile_of(&samples, 0.95),
            p99_ms: percentile_of(&samples, 0.99),
        }
    }
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-rank percentile over an already-sorted sample set.
fn percentile_of(sorted: &[u64], fraction: f64) -> f64 {
    let rank = ((sorted.len() as f64 - 1.0) * fraction).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}
