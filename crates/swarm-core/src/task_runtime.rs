//! Async Task Runtime (C12): a queue-backed worker pool wrapping any of the
//! synchronous pipelines above, §4.7.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskQueueError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for TaskQueueError {
    fn from(e: redis::RedisError) -> Self {
        TaskQueueError::Redis(e.to_string())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskStoreError {
    #[error("task {0:?} not found")]
    NotFound(String),
}

/// One unit of queued work. `trace_id`/`parent_span_id` let the worker
/// restore the caller's trace context before running the handler (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub payload: serde_json::Value,
    pub trace_id: String,
    pub parent_span_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLifecycleEvent {
    Submitted,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Lifecycle telemetry sink (§4.7 "emit lifecycle telemetry"). Separate from
/// `tracing` spans so callers can wire counters/metrics without scraping logs.
pub trait TaskLifecycleObserver: Send + Sync {
    fn on_event(&self, task_id: &str, event: TaskLifecycleEvent);
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<(), TaskQueueError>;
    /// Blocking dequeue with a timeout; an empty result on timeout is not an error.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>, TaskQueueError>;
    async fn acknowledge(&self, task_id: &str) -> Result<(), TaskQueueError>;
    async fn reject(&self, task_id: &str) -> Result<(), TaskQueueError>;
    async fn queue_length(&self) -> Result<usize, TaskQueueError>;
    async fn close(&self);
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn update(&self, task_id: &str, status: TaskStatus) -> Result<(), TaskStoreError>;
}

/// Handler registered against the runtime; panics inside it are recovered
/// by the worker loop and recorded as `HANDLER_ERROR`, not propagated here.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> Result<serde_json::Value, String>;
}

/// In-process FIFO queue for embedders without Redis, and for tests.
/// Grounded on `mofa-kernel::bus::queue::EventQueue`'s
/// mutex-plus-`Notify` pattern: check the queue, register for
/// notification *before* re-checking, to avoid missed wakeups.
pub struct InMemoryTaskQueue {
    queue: StdMutex<VecDeque<Task>>,
    notify: Notify,
    closed: AtomicBool,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self { queue: StdMutex::new(VecDeque::new()), notify: Notify::new(), closed: AtomicBool::new(false) }
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: Task) -> Result<(), TaskQueueError> {
        self.queue.lock().expect("queue mutex poisoned").push_back(task);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>, TaskQueueError> {
        let notified = self.notify.notified();
        if let Some(task) = self.queue.lock().expect("queue mutex poisoned").pop_front() {
            return Ok(Some(task));
        }
        tokio::select! {
            _ = notified => Ok(self.queue.lock().expect("queue mutex poisoned").pop_front()),
            _ = tokio::time::sleep(timeout) => Ok(None),
        }
    }

    /// No redelivery bookkeeping in-process: a dequeued task is already
    /// removed, so acknowledge/reject are no-ops here.
    async fn acknowledge(&self, _task_id: &str) -> Result<(), TaskQueueError> {
        Ok(())
    }

    async fn reject(&self, _task_id: &str) -> Result<(), TaskQueueError> {
        Ok(())
    }

    async fn queue_length(&self) -> Result<usize, TaskQueueError> {
        Ok(self.queue.lock().expect("queue mutex poisoned").len())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// Redis-backed queue: `LPUSH` on enqueue, blocking `BRPOP` on dequeue
/// (§4.7), following the same key-prefix convention as
/// [`crate::hitl::RedisCheckpointStore`].
pub struct RedisTaskQueue {
    connection_manager: ConnectionManager,
    queue_key: String,
}

impl RedisTaskQueue {
    pub async fn new(connection_string: &str) -> Result<Self, TaskQueueError> {
        Self::with_key_prefix(connection_string, "swarm").await
    }

    pub async fn with_key_prefix(connection_string: &str, key_prefix: &str) -> Result<Self, TaskQueueError> {
        let client = redis::Client::open(connection_string)?;
        let connection_manager = ConnectionManager::new(client).await?;
        Ok(Self { connection_manager, queue_key: format!("{key_prefix}:tasks:queue") })
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: Task) -> Result<(), TaskQueueError> {
        let mut conn = self.connection_manager.clone();
        let payload = serde_json::to_string(&task).map_err(|e| TaskQueueError::Serialization(e.to_string()))?;
        let _: () = conn.lpush(&self.queue_key, payload).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>, TaskQueueError> {
        let mut conn = self.connection_manager.clone();
        let timeout_secs = timeout.as_secs_f64().max(0.01);
        let result: Option<(String, String)> = conn.brpop(&self.queue_key, timeout_secs).await?;
        match result {
            None => Ok(None),
            Some((_, payload)) => serde_json::from_str(&payload).map(Some).map_err(|e| TaskQueueError::Serialization(e.to_string())),
        }
    }

    /// `BRPOP` already removes the element; nothing further to acknowledge.
    async fn acknowledge(&self, _task_id: &str) -> Result<(), TaskQueueError> {
        Ok(())
    }

    async fn reject(&self, _task_id: &str) -> Result<(), TaskQueueError> {
        Ok(())
    }

    async fn queue_length(&self) -> Result<usize, TaskQueueError> {
        let mut conn = self.connection_manager.clone();
        let len: usize = conn.llen(&self.queue_key).await?;
        Ok(len)
    }

    async fn close(&self) {}
}

pub struct InMemoryTaskStore {
    statuses: RwLock<HashMap<String, TaskStatus>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self { statuses: RwLock::new(HashMap::new()) }
    }

    pub async fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.statuses.read().await.get(task_id).copied()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn update(&self, task_id: &str, status: TaskStatus) -> Result<(), TaskStoreError> {
        self.statuses.write().await.insert(task_id.to_string(), status);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TaskRuntimeConfig {
    pub num_workers: usize,
    pub dequeue_timeout: Duration,
    pub task_deadline: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for TaskRuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: 5,
            dequeue_timeout: Duration::from_secs(5),
            task_deadline: Duration::from_secs(30 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TaskRuntime {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn TaskHandler>,
    config: TaskRuntimeConfig,
    observer: Option<Arc<dyn TaskLifecycleObserver>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskRuntime {
    pub fn new(queue: Arc<dyn TaskQueue>, store: Arc<dyn TaskStore>, handler: Arc<dyn TaskHandler>, config: TaskRuntimeConfig) -> Self {
        Self { queue, store, handler, config, observer: None, stop: Arc::new(AtomicBool::new(false)), workers: Vec::new() }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TaskLifecycleObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn submit(&self, task: Task) -> Result<(), TaskQueueError> {
        if let Some(observer) = &self.observer {
            observer.on_event(&task.task_id, TaskLifecycleEvent::Submitted);
        }
        self.store.update(&task.task_id, TaskStatus::Queued).await.ok();
        self.queue.enqueue(task).await
    }

    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        for worker_id in 0..self.config.num_workers.max(1) {
            let queue = self.queue.clone();
            let store = self.store.clone();
            let handler = self.handler.clone();
            let config = self.config.clone();
            let observer = self.observer.clone();
            let stop = self.stop.clone();

            self.workers.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, store, handler, config, observer, stop).await;
            }));
        }
    }

    /// Cancels the worker loops and waits up to `shutdown_timeout` for
    /// in-flight tasks to drain (§4.7).
    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.close().await;

        let shutdown = self.config.shutdown_timeout;
        for handle in self.workers.drain(..) {
            if tokio::time::timeout(shutdown, handle).await.is_err() {
                warn!("worker did not stop within shutdown_timeout");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn TaskHandler>,
    config: TaskRuntimeConfig,
    observer: Option<Arc<dyn TaskLifecycleObserver>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let task = match queue.dequeue(config.dequeue_timeout).await {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(e) => {
                error!(worker_id, error = %e, "dequeue failed");
                continue;
            }
        };

        let span = info_span!("task", task_id = %task.task_id, trace_id = %task.trace_id, parent_span_id = %task.parent_span_id);
        run_task(&task, &store, &handler, &observer, config.task_deadline).instrument(span).await;
        queue.acknowledge(&task.task_id).await.ok();
    }
}

async fn run_task(
    task: &Task,
    store: &Arc<dyn TaskStore>,
    handler: &Arc<dyn TaskHandler>,
    observer: &Option<Arc<dyn TaskLifecycleObserver>>,
    deadline: Duration,
) {
    emit(observer, &task.task_id, TaskLifecycleEvent::Started);
    store.update(&task.task_id, TaskStatus::Running).await.ok();

    let handler = handler.clone();
    let payload = task.payload.clone();
    let attempt = tokio::spawn(async move { handler.handle(payload).await });

    match tokio::time::timeout(deadline, attempt).await {
        Ok(Ok(Ok(_response))) => {
            emit(observer, &task.task_id, TaskLifecycleEvent::Completed);
            store.update(&task.task_id, TaskStatus::Completed).await.ok();
            info!(task_id = %task.task_id, "task completed");
        }
        Ok(Ok(Err(reason))) => {
            emit(observer, &task.task_id, TaskLifecycleEvent::Failed);
            store.update(&task.task_id, TaskStatus::Failed).await.ok();
            warn!(task_id = %task.task_id, reason, "task handler returned an error");
        }
        Ok(Err(join_error)) => {
            emit(observer, &task.task_id, TaskLifecycleEvent::Failed);
            store.update(&task.task_id, TaskStatus::Failed).await.ok();
            error!(task_id = %task.task_id, error = %join_error, "task handler panicked, recorded as HANDLER_ERROR");
        }
        Err(_) => {
            emit(observer, &task.task_id, TaskLifecycleEvent::Timeout);
            store.update(&task.task_id, TaskStatus::Failed).await.ok();
            warn!(task_id = %task.task_id, "task exceeded its deadline");
        }
    }
}

fn emit(observer: &Option<Arc<dyn TaskLifecycleObserver>>, task_id: &str, event: TaskLifecycleEvent) {
    if let Some(observer) = observer {
        observer.on_event(task_id, event);
    }
}
