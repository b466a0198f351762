//! Expiry Processor (C10): a single serial scanner that resolves timed-out
//! checkpoints, §4.5.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarm_kernel::checkpoint::{Checkpoint, CheckpointStatus, DefaultAction};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{ExpiryDelivery, HitlConfig, StreamingExpiryBehavior};
use crate::hitl::checkpoint_store::CheckpointStore;

/// A MUST-be-idempotent side effect fired when a checkpoint expires (at
/// least under at-least-once delivery, §4.5).
#[async_trait]
pub trait ExpiryCallback: Send + Sync {
    async fn on_expired(&self, checkpoint: &Checkpoint);
}

const CLAIM_TTL: Duration = Duration::from_secs(30);

pub struct ExpiryProcessor {
    store: Arc<dyn CheckpointStore>,
    config: HitlConfig,
    instance_id: String,
    callback: Option<Arc<dyn ExpiryCallback>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ExpiryProcessor {
    pub fn new(store: Arc<dyn CheckpointStore>, config: HitlConfig, instance_id: impl Into<String>) -> Self {
        Self { store, config, instance_id: instance_id.into(), callback: None, stop: Arc::new(AtomicBool::new(false)), handle: None }
    }

    pub fn set_expiry_callback(&mut self, callback: Arc<dyn ExpiryCallback>) {
        self.callback = Some(callback);
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let store = self.store.clone();
        let config = self.config.clone();
        let instance_id = self.instance_id.clone();
        let callback = self.callback.clone();
        let stop = self.stop.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.expiry_scan_interval);
            loop {
                interval.tick().await;
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = scan_once(&store, &config, &instance_id, callback.clone()).await {
                    error!(error = %e, "expiry scan failed");
                }
            }
        }));
    }

    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn scan_once(
    store: &Arc<dyn CheckpointStore>,
    config: &HitlConfig,
    instance_id: &str,
    callback: Option<Arc<dyn ExpiryCallback>>,
) -> Result<(), super::checkpoint_store::CheckpointStoreError> {
    let pending = store.list_pending(config.expiry_batch_size).await?;
    let now = chrono::Utc::now();

    for checkpoint in pending {
        if !checkpoint.is_expired(now) {
            continue;
        }
        if !store.try_claim_expiry(&checkpoint.checkpoint_id, instance_id, CLAIM_TTL).await? {
            continue;
        }

        process_expired(store, config, callback.clone(), checkpoint.clone()).await;
        store.release_claim(&checkpoint.checkpoint_id, instance_id).await?;
    }
    Ok(())
}

async fn process_expired(
    store: &Arc<dyn CheckpointStore>,
    config: &HitlConfig,
    callback: Option<Arc<dyn ExpiryCallback>>,
    mut checkpoint: Checkpoint,
) {
    let action = checkpoint.decision.default_action;
    let is_streaming = matches!(checkpoint.request_mode, Some(swarm_kernel::checkpoint::RequestMode::Streaming));
    let is_streaming_implicit_deny =
        is_streaming && config.streaming_expiry_behavior == StreamingExpiryBehavior::ImplicitDeny;

    let new_status = if is_streaming_implicit_deny {
        CheckpointStatus::Expired
    } else {
        CheckpointStatus::expired_with_action(action)
    };

    match config.expiry_delivery {
        ExpiryDelivery::AtMostOnce => {
            checkpoint.status = new_status;
            if let Err(e) = store.save(checkpoint.clone()).await {
                error!(error = %e, "failed to persist expired checkpoint status");
                return;
            }
            if let Some(cb) = callback {
                fire_callback_logging_panics(cb, checkpoint.clone()).await;
            }
        }
        ExpiryDelivery::AtLeastOnce => {
            let fired_cleanly = match callback {
                Some(cb) => fire_callback_logging_panics(cb, checkpoint.clone()).await,
                None => true,
            };
            if fired_cleanly {
                checkpoint.status = new_status;
                if let Err(e) = store.save(checkpoint).await {
                    error!(error = %e, "failed to persist expired checkpoint status after callback");
                }
            } else {
                warn!(checkpoint_id = %checkpoint.checkpoint_id, "expiry callback failed under at-least-once delivery, leaving pending for next scan");
            }
        }
    }

    info!(
        checkpoint_id = %checkpoint.checkpoint_id,
        action = ?action,
        streaming_implicit_deny = is_streaming_implicit_deny,
        "checkpoint expired"
    );
}

/// Runs the callback on its own task so a panic inside it surfaces as a
/// `JoinError` instead of taking down the scanner loop; returns whether it
/// completed without panicking.
async fn fire_callback_logging_panics(callback: Arc<dyn ExpiryCallback>, checkpoint: Checkpoint) -> bool {
    let result = tokio::spawn(async move { callback.on_expired(&checkpoint).await }).await;
    match result {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "expiry callback panicked");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::checkpoint_store::InMemoryCheckpointStore;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use swarm_kernel::checkpoint::{InterruptDecision, InterruptPoint};
    use swarm_kernel::plan::Plan;

    fn config() -> HitlConfig {
        HitlConfig {
            enabled: true,
            require_plan_approval: false,
            sensitive_agents: HashSet::new(),
            sensitive_capabilities: HashSet::new(),
            default_timeout: Duration::from_secs(1),
            default_action: DefaultAction::Reject,
            escalate_after_failures: 3,
            expiry_enabled: true,
            expiry_scan_interval: Duration::from_millis(50),
            expiry_batch_size: 100,
            expiry_delivery: ExpiryDelivery::AtMostOnce,
            streaming_expiry_behavior: StreamingExpiryBehavior::ImplicitDeny,
        }
    }

    fn expired_checkpoint(id: &str) -> Checkpoint {
        Checkpoint {
            checkpoint_id: id.to_string(),
            request_id: "r1".into(),
            original_request_id: "r1".into(),
            status: CheckpointStatus::Pending,
            interrupt_point: InterruptPoint::BeforeStep,
            plan: Plan::new("do it"),
            current_step: None,
            step_results: Vec::new(),
            resolved_parameters: None,
            decision: InterruptDecision { should_interrupt: true, reason: "r".into(), priority: 1, default_action: DefaultAction::Reject, timeout_secs: 1, metadata: Default::default() },
            request_mode: None,
            expires_at: chrono::Utc::now() - chrono::Duration::seconds(5),
            user_context: Default::default(),
        }
    }

    struct CountingCallback(Arc<AtomicUsize>);

    #[async_trait]
    impl ExpiryCallback for CountingCallback {
        async fn on_expired(&self, _checkpoint: &Checkpoint) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn expired_pending_checkpoint_transitions_to_expired_rejected() {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        store.save(expired_checkpoint("c1")).await.unwrap();
        let config = config();
        scan_once(&store, &config, "worker-1", None).await.unwrap();
        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.status, CheckpointStatus::ExpiredRejected);
    }

    #[tokio::test]
    async fn at_most_once_fires_callback_after_status_update() {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        store.save(expired_checkpoint("c1")).await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let callback: Arc<dyn ExpiryCallback> = Arc::new(CountingCallback(counter.clone()));
        scan_once(&store, &config(), "worker-1", Some(callback)).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_expired_checkpoint_is_left_untouched() {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let mut cp = expired_checkpoint("c1");
        cp.expires_at = chrono::Utc::now() + chrono::Duration::seconds(300);
        store.save(cp).await.unwrap();
        scan_once(&store, &config(), "worker-1", None).await.unwrap();
        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.status, CheckpointStatus::Pending);
    }
}
