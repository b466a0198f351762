//! Checkpoint Store (C10): durable storage of HITL pause points, §4.5.
//!
//! Two implementations behind one trait, following the
//! `dashflow-redis-checkpointer` key-layout convention (hash/set per entity,
//! prefixed, TTL-bearing): [`RedisCheckpointStore`] for real deployments,
//! [`InMemoryCheckpointStore`] for embedding without Redis and for tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use swarm_kernel::checkpoint::{Checkpoint, CheckpointStatus};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CheckpointStoreError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("checkpoint {0:?} not found")]
    NotFound(String),
}

impl From<redis::RedisError> for CheckpointStoreError {
    fn from(e: redis::RedisError) -> Self {
        CheckpointStoreError::Redis(e.to_string())
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointStoreError>;
    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, CheckpointStoreError>;
    async fn update_status(&self, checkpoint_id: &str, status: CheckpointStatus) -> Result<(), CheckpointStoreError>;
    async fn list_pending(&self, limit: usize) -> Result<Vec<Checkpoint>, CheckpointStoreError>;

    /// Every checkpoint ever saved under `request_id`, via the
    /// request→checkpoints index (§4.5 persist step 2).
    async fn list_by_request(&self, request_id: &str) -> Result<Vec<Checkpoint>, CheckpointStoreError>;

    async fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointStoreError>;

    /// Distributed claim via SETNX-with-TTL (§4.5 Expiry Processor).
    /// `instance_id` identifies the claiming worker; returns whether the
    /// claim was acquired.
    async fn try_claim_expiry(&self, checkpoint_id: &str, instance_id: &str, ttl: Duration) -> Result<bool, CheckpointStoreError>;

    /// Check-and-delete release: only removes the claim if it is still held
    /// by `instance_id`.
    async fn release_claim(&self, checkpoint_id: &str, instance_id: &str) -> Result<(), CheckpointStoreError>;
}

/// In-process store for embedders without Redis, and for tests. Not shared
/// across machines, so the distributed claim degenerates to a local mutex
/// check — still correct for a single process.
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    claims: RwLock<HashMap<String, String>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self { checkpoints: RwLock::new(HashMap::new()), claims: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointStoreError> {
        self.checkpoints.write().insert(checkpoint.checkpoint_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        Ok(self.checkpoints.read().get(checkpoint_id).cloned())
    }

    async fn update_status(&self, checkpoint_id: &str, status: CheckpointStatus) -> Result<(), CheckpointStoreError> {
        let mut guard = self.checkpoints.write();
        let checkpoint = guard.get_mut(checkpoint_id).ok_or_else(|| CheckpointStoreError::NotFound(checkpoint_id.to_string()))?;
        checkpoint.status = status;
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<Checkpoint>, CheckpointStoreError> {
        Ok(self
            .checkpoints
            .read()
            .values()
            .filter(|c| c.status == CheckpointStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_by_request(&self, request_id: &str) -> Result<Vec<Checkpoint>, CheckpointStoreError> {
        Ok(self.checkpoints.read().values().filter(|c| c.request_id == request_id).cloned().collect())
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointStoreError> {
        self.checkpoints.write().remove(checkpoint_id);
        Ok(())
    }

    async fn try_claim_expiry(&self, checkpoint_id: &str, instance_id: &str, _ttl: Duration) -> Result<bool, CheckpointStoreError> {
        let mut claims = self.claims.write();
        if claims.contains_key(checkpoint_id) {
            return Ok(false);
        }
        claims.insert(checkpoint_id.to_string(), instance_id.to_string());
        Ok(true)
    }

    async fn release_claim(&self, checkpoint_id: &str, instance_id: &str) -> Result<(), CheckpointStoreError> {
        let mut claims = self.claims.write();
        if claims.get(checkpoint_id).map(|v| v.as_str()) == Some(instance_id) {
            claims.remove(checkpoint_id);
        }
        Ok(())
    }
}

/// Redis-backed store. Key layout under `<prefix>`:
///   - `<prefix>:checkpoint:<id>` — JSON-encoded [`Checkpoint`], `SET ... PX <ttl_ms>`.
///   - `<prefix>:pending` — a set of checkpoint ids with `status=pending`.
///   - `<prefix>:request:<request_id>` — a set of every checkpoint id ever
///     saved for that request, the request→checkpoints index (§4.5).
///   - `<prefix>:expiry:claim:<id>` — `SETNX`-guarded claim, 30s TTL.
pub struct RedisCheckpointStore {
    connection_manager: ConnectionManager,
    key_prefix: String,
}

impl RedisCheckpointStore {
    pub async fn new(connection_string: &str) -> Result<Self, CheckpointStoreError> {
        Self::with_key_prefix(connection_string, "swarm").await
    }

    pub async fn with_key_prefix(connection_string: &str, key_prefix: &str) -> Result<Self, CheckpointStoreError> {
        let client = redis::Client::open(connection_string)?;
        let connection_manager = ConnectionManager::new(client).await?;
        debug!(prefix = key_prefix, "connected checkpoint store to redis");
        Ok(Self { connection_manager, key_prefix: key_prefix.to_string() })
    }

    fn checkpoint_key(&self, id: &str) -> String {
        format!("{}:checkpoint:{}", self.key_prefix, id)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.key_prefix)
    }

    fn request_key(&self, request_id: &str) -> String {
        format!("{}:request:{}", self.key_prefix, request_id)
    }

    fn claim_key(&self, id: &str) -> String {
        format!("{}:expiry:claim:{}", self.key_prefix, id)
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointStoreError> {
        let mut conn = self.connection_manager.clone();
        let ttl_secs = (checkpoint.expires_at - chrono::Utc::now()).num_seconds().max(1) as u64;
        let payload = serde_json::to_string(&checkpoint).map_err(|e| CheckpointStoreError::Serialization(e.to_string()))?;
        let is_pending = checkpoint.status == CheckpointStatus::Pending;

        let _: () = conn.set_ex(self.checkpoint_key(&checkpoint.checkpoint_id), payload, ttl_secs).await?;
        if is_pending {
            let _: () = conn.sadd(self.pending_key(), &checkpoint.checkpoint_id).await?;
        }
        let _: () = conn.sadd(self.request_key(&checkpoint.request_id), &checkpoint.checkpoint_id).await?;
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        let mut conn = self.connection_manager.clone();
        let raw: Option<String> = conn.get(self.checkpoint_key(checkpoint_id)).await?;
        match raw {
            None => Ok(None),
            Some(s) => serde_json::from_str(&s).map(Some).map_err(|e| CheckpointStoreError::Serialization(e.to_string())),
        }
    }

    async fn update_status(&self, checkpoint_id: &str, status: CheckpointStatus) -> Result<(), CheckpointStoreError> {
        let mut checkpoint = self.load(checkpoint_id).await?.ok_or_else(|| CheckpointStoreError::NotFound(checkpoint_id.to_string()))?;
        checkpoint.status = status;

        let mut conn = self.connection_manager.clone();
        if status != CheckpointStatus::Pending {
            let _: () = conn.srem(self.pending_key(), checkpoint_id).await?;
        }
        self.save(checkpoint).await
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<Checkpoint>, CheckpointStoreError> {
        let mut conn = self.connection_manager.clone();
        let ids: Vec<String> = conn.smembers(self.pending_key()).await?;
        let mut out = Vec::new();
        for id in ids.into_iter().take(limit) {
            if let Some(c) = self.load(&id).await? {
                if c.status == CheckpointStatus::Pending {
                    out.push(c);
                }
            }
        }
        Ok(out)
    }

    async fn list_by_request(&self, request_id: &str) -> Result<Vec<Checkpoint>, CheckpointStoreError> {
        let mut conn = self.connection_manager.clone();
        let ids: Vec<String> = conn.smembers(self.request_key(request_id)).await?;
        let mut out = Vec::new();
        for id in ids {
            if let Some(c) = self.load(&id).await? {
                out.push(c);
            }
        }
        Ok(out)
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<(), CheckpointStoreError> {
        let mut conn = self.connection_manager.clone();
        if let Some(checkpoint) = self.load(checkpoint_id).await? {
            let _: () = conn.srem(self.request_key(&checkpoint.request_id), checkpoint_id).await?;
        }
        let _: () = conn.del(self.checkpoint_key(checkpoint_id)).await?;
        let _: () = conn.srem(self.pending_key(), checkpoint_id).await?;
        Ok(())
    }

    async fn try_claim_expiry(&self, checkpoint_id: &str, instance_id: &str, ttl: Duration) -> Result<bool, CheckpointStoreError> {
        let mut conn = self.connection_manager.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.claim_key(checkpoint_id))
            .arg(instance_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn release_claim(&self, checkpoint_id: &str, instance_id: &str) -> Result<(), CheckpointStoreError> {
        const RELEASE_SCRIPT: &str = r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#;
        let mut conn = self.connection_manager.clone();
        let result: i32 = redis::Script::new(RELEASE_SCRIPT).key(self.claim_key(checkpoint_id)).arg(instance_id).invoke_async(&mut conn).await?;
        if result == 0 {
            warn!(checkpoint_id, "claim release no-op: not owned by this instance");
        }
        Ok(())
    }
}
