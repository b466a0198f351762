//! DAG Executor (C8), §4.4.

pub mod cancellation;
pub mod dag;

pub use cancellation::CancellationToken;
pub use dag::{DagExecutor, ExecutionOutcome, ExecutorConfig, StepCompleteCallback};
