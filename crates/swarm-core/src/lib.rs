//! Concrete engine for the cognitive swarm orchestrator: capability
//! catalog, discovery, capability provider, planner, four-layer parameter
//! resolver, DAG executor, human-in-the-loop controller, synthesizer,
//! async task runtime, metrics, and the top-level orchestrator facade that
//! wires them together.
//!
//! Trait and data-model definitions this crate builds against live in
//! `swarm_kernel`.

pub mod catalog;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod hitl;
pub mod json_extract;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod resolver;
pub mod synthesizer;
pub mod task_runtime;

pub use catalog::InMemoryCatalog;
pub use config::{ConfigError, ConfigResult, ExpiryDelivery, HitlConfig, OrchestratorConfig, StreamingExpiryBehavior};
pub use discovery::{Discovery, DiscoveryError, DiscoveryFilter, StaticDiscovery};
pub use executor::{CancellationToken, DagExecutor, ExecutionOutcome, ExecutorConfig, StepCompleteCallback};
pub use hitl::{CheckpointStore, CheckpointStoreError, ExpiryCallback, ExpiryProcessor, HitlController, InMemoryCheckpointStore, RedisCheckpointStore};
pub use metrics::{LatencyPercentiles, MetricsSnapshot, OrchestratorMetrics};
pub use orchestrator::{ExecutionRecord, ExecutionStore, Orchestrator, OrchestratorResponse};
pub use planner::{Planner, PlannerConfig};
pub use provider::{CapabilityProvider, LocalProvider, ProviderError, ProviderOutput, ServiceBackedProvider};
pub use synthesizer::{LlmDebugStore, Synthesizer, SynthesizerConfig, SynthesisStrategy};
pub use task_runtime::{
    InMemoryTaskQueue, InMemoryTaskStore, RedisTaskQueue, Task, TaskHandler, TaskLifecycleEvent,
    TaskLifecycleObserver, TaskQueue, TaskQueueError, TaskRuntime, TaskRuntimeConfig, TaskStatus, TaskStore,
    TaskStoreError,
};
