//! Trait and data-model layer for the cognitive swarm orchestrator.
//!
//! This crate defines the shapes every concrete engine component in
//! `swarm-core` is built against: the capability/plan data model (§3 of the
//! design), the wire error taxonomy (§6), the opaque `LlmClient` contract
//! the planner and resolver layers call through, and a small retry-policy
//! helper shared by the capability provider and the DAG executor.
//!
//! No I/O happens in this crate. Concrete registries, HTTP clients, and
//! storage backends live in `swarm-core`.

pub mod capability;
pub mod checkpoint;
pub mod error;
pub mod llm;
pub mod plan;
pub mod retry;

pub use capability::{Capability, CapabilityRegistry, Parameter, ParameterType, Service};
pub use checkpoint::{Checkpoint, CheckpointStatus, InterruptDecision, InterruptPoint, RequestMode};
pub use error::{ErrorCode, KernelError, KernelResult};
pub use llm::{GenerateOptions, GenerateResponse, LlmClient, TokenUsage};
pub use plan::{
    ExecutionContext, ExecutionResult, ParamValue, Plan, Step, StepResult,
};
pub use retry::{RetryConfig, RetryPolicy};
