//! Retry-policy helper shared by the Capability Provider (§4.1 resilience)
//! and the DAG Executor's transport-level retry (§4.4 step 5).
//!
//! Grounded on `mofa-runtime::retry`: delay strategies as a small enum plus
//! a generic async retry loop parameterized by a retryability predicate.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Delay strategy between retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    Fixed { delay_ms: u64 },
    Linear { base_ms: u64 },
    /// Exponential backoff capped at `max_ms`, with optional jitter
    /// uniformly distributed in [75%, 100%] of the capped delay (avoids
    /// correlated retries across concurrent steps).
    ExponentialBackoff {
        base_ms: u64,
        max_ms: u64,
        jitter: bool,
    },
}

use serde::{Deserialize, Serialize};

impl RetryPolicy {
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let ms = match self {
            RetryPolicy::Fixed { delay_ms } => *delay_ms,
            RetryPolicy::Linear { base_ms } => base_ms.saturating_mul((attempt + 1) as u64),
            RetryPolicy::ExponentialBackoff { base_ms, max_ms, jitter } => {
                let exp = 1u64
                    .checked_shl(attempt as u32)
                    .and_then(|s| base_ms.checked_mul(s))
                    .unwrap_or(*max_ms);
                let capped = exp.min(*max_ms);
                if *jitter {
                    let min_delay = capped.saturating_mul(3) / 4;
                    if min_delay >= capped {
                        capped
                    } else {
                        rand::thread_rng().gen_range(min_delay..=capped)
                    }
                } else {
                    capped
                }
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::ExponentialBackoff {
            base_ms: 500,
            max_ms: 10_000,
            jitter: true,
        }
    }
}

/// How many attempts to make and which [`RetryPolicy`] to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            policy: RetryPolicy::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_attempts: usize, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts,
            policy: RetryPolicy::ExponentialBackoff { base_ms, max_ms, jitter: true },
        }
    }
}

/// Retry `f` up to `config.max_attempts` times, sleeping
/// `config.policy.delay_for(attempt)` between attempts, stopping early when
/// `is_retryable` returns false for the latest error.
pub async fn retry_with_policy<F, Fut, T, E>(
    config: &RetryConfig,
    is_retryable: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(config.policy.delay_for(attempt - 1)).await;
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("loop runs at least once"))
}
