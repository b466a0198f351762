//! Orchestrator — the caller-facing facade wiring every other component
//! together, §6 "Caller-facing API".

use std::collections::VecDeque;
use std::sync::Arc;
use swarm_kernel::capability::CapabilityRegistry;
use swarm_kernel::checkpoint::{Checkpoint, CheckpointStatus, InterruptDecision, InterruptPoint};
use swarm_kernel::llm::LlmClient;
use swarm_kernel::plan::{ExecutionResult, Plan};
use swarm_kernel::{KernelError, KernelResult};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::config::OrchestratorConfig;
use crate::executor::{CancellationToken, DagExecutor, ExecutionOutcome, ExecutorConfig, StepCompleteCallback};
use crate::hitl::{CheckpointStore, HitlController};
use crate::metrics::{MetricsSnapshot, OrchestratorMetrics};
use crate::planner::{Planner, PlannerConfig};
use crate::provider::CapabilityProvider;
use crate::synthesizer::{Synthesizer, SynthesizerConfig};

/// Best-effort record of a completed plan+result keyed by request-id and
/// trace-id (§6 "ExecutionStore (optional)").
#[async_trait::async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn record_execution(&self, request_id: &str, plan: &Plan, result: &ExecutionResult) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub request_id: String,
    pub plan_id: String,
    pub success: bool,
    pub total_duration_ms: u64,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorResponse {
    pub request_id: String,
    pub plan: Plan,
    pub response: String,
    pub execution_result: Option<ExecutionResult>,
    pub checkpoint: Option<Checkpoint>,
    pub errors: Vec<String>,
}

pub struct Orchestrator {
    catalog: Arc<dyn CapabilityRegistry>,
    provider: Arc<dyn CapabilityProvider>,
    planner: Planner,
    executor: DagExecutor,
    synthesizer: Synthesizer,
    hitl_config: crate::config::HitlConfig,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    execution_store: Option<Arc<dyn ExecutionStore>>,
    metrics: OrchestratorMetrics,
    history: RwLock<VecDeque<ExecutionRecord>>,
    history_size: usize,
}

impl Orchestrator {
    pub fn new(catalog: Arc<dyn CapabilityRegistry>, llm: Arc<dyn LlmClient>, provider: Arc<dyn CapabilityProvider>, config: &OrchestratorConfig) -> Self {
        let planner = Planner::new(
            llm.clone(),
            PlannerConfig {
                plan_parse_max_retries: config.plan_parse_max_retries,
                hallucination_max_retries: config.hallucination_max_retries,
                hallucination_validation_enabled: config.hallucination_validation_enabled,
            },
        )
        .with_catalog(catalog.clone());

        let executor = DagExecutor::new(catalog.clone(), llm.clone(), ExecutorConfig::from(config)).with_hitl(config.hitl.clone());
        let synthesizer = Synthesizer::new(llm, SynthesizerConfig::default());

        Self {
            catalog,
            provider,
            planner,
            executor,
            synthesizer,
            hitl_config: config.hitl.clone(),
            checkpoint_store: None,
            execution_store: None,
            metrics: OrchestratorMetrics::new(),
            history: RwLock::new(VecDeque::with_capacity(config.history_size)),
            history_size: config.history_size,
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.execution_store = Some(store);
        self
    }

    /// Replace the synthesizer wholesale — the way to attach a debug store
    /// or a non-default [`SynthesizerConfig`], since `Synthesizer` doesn't
    /// expose its LLM handle back out for in-place rebuilding.
    pub fn with_synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// `ProcessRequest`: provider → planner → (plan-approval HITL gate) →
    /// DAG executor → synthesizer, recording metrics/history/execution-store
    /// along the way (§6).
    ///
    /// `step_complete_callback` is per-request context: when present it is
    /// used for this call's progress reporting regardless of whatever
    /// callback `ExecutorConfig` carries (§4.4 step 6's context-over-config
    /// precedence), so a caller can attach a one-off reporter without
    /// mutating the orchestrator's shared config.
    #[instrument(skip(self, metadata, step_complete_callback), fields(request_id = %request_id))]
    pub async fn process_request(
        &self,
        request_id: &str,
        user_request: &str,
        metadata: std::collections::HashMap<String, String>,
        step_complete_callback: Option<&dyn StepCompleteCallback>,
    ) -> KernelResult<OrchestratorResponse> {
        let _ = metadata;
        let provider_output = self.provider.get_description(user_request).await.map_err(|e| KernelError::Routing(e.to_string()))?;
        let plan = self.planner.plan(user_request, &provider_output).await?;

        if self.hitl_config.enabled && self.hitl_config.require_plan_approval {
            let hitl = HitlController::new(&self.hitl_config);
            let decision = hitl.decide_on_plan(&plan);
            if decision.should_interrupt {
                let checkpoint = self.build_plan_checkpoint(&plan, request_id, decision).await;
                return Ok(OrchestratorResponse {
                    request_id: request_id.to_string(),
                    plan,
                    response: String::new(),
                    execution_result: None,
                    checkpoint: Some(checkpoint),
                    errors: Vec::new(),
                });
            }
        }

        self.run_and_synthesize(request_id, &plan, user_request, step_complete_callback).await
    }

    /// `ExecutePlan`: runs a caller-supplied plan and returns the raw
    /// execution result, no synthesis or checkpoint persistence.
    #[instrument(skip(self, plan, step_complete_callback), fields(plan_id = %plan.plan_id))]
    pub async fn execute_plan(&self, plan: &Plan, step_complete_callback: Option<&dyn StepCompleteCallback>) -> KernelResult<ExecutionResult> {
        let cancellation = CancellationToken::new();
        let request_id = uuid::Uuid::new_v4().to_string();
        let outcome = self.executor.execute(plan, &plan.original_request, &request_id, step_complete_callback, &cancellation).await?;

        match outcome {
            ExecutionOutcome::Completed(result) => {
                self.record_completion(&request_id, plan, &result).await;
                Ok(result)
            }
            ExecutionOutcome::Suspended(checkpoint) => {
                warn!(request_id = %request_id, checkpoint_id = %checkpoint.checkpoint_id, "plan suspended for HITL review inside ExecutePlan; caller must use ProcessRequest/ExecutePlanWithSynthesis to resume");
                if let Some(store) = &self.checkpoint_store {
                    store.save(checkpoint.clone()).await.ok();
                }
                let partial = partial_result_from_checkpoint(&checkpoint);
                self.record_completion(&request_id, plan, &partial).await;
                Ok(partial)
            }
        }
    }

    /// `ExecutePlanWithSynthesis`: the full path — DAG executor, checkpoint
    /// persistence on suspension, synthesizer, execution-store recording.
    #[instrument(skip(self, plan, step_complete_callback), fields(plan_id = %plan.plan_id))]
    pub async fn execute_plan_with_synthesis(
        &self,
        plan: &Plan,
        original_request: &str,
        step_complete_callback: Option<&dyn StepCompleteCallback>,
    ) -> KernelResult<OrchestratorResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.run_and_synthesize(&request_id, plan, original_request, step_complete_callback).await
    }

    async fn run_and_synthesize(
        &self,
        request_id: &str,
        plan: &Plan,
        user_request: &str,
        step_complete_callback: Option<&dyn StepCompleteCallback>,
    ) -> KernelResult<OrchestratorResponse> {
        let cancellation = CancellationToken::new();
        let outcome = self.executor.execute(plan, user_request, request_id, step_complete_callback, &cancellation).await?;

        let result = match outcome {
            ExecutionOutcome::Completed(result) => result,
            ExecutionOutcome::Suspended(checkpoint) => {
                if let Some(store) = &self.checkpoint_store {
                    store.save(checkpoint.clone()).await.ok();
                }
                return Ok(OrchestratorResponse {
                    request_id: request_id.to_string(),
                    plan: plan.clone(),
                    response: String::new(),
                    execution_result: None,
                    checkpoint: Some(checkpoint),
                    errors: Vec::new(),
                });
            }
        };

        self.record_completion(request_id, plan, &result).await;

        let errors: Vec<String> = result.steps.iter().filter(|s| !s.success).filter_map(|s| s.error.clone()).collect();

        let synthesis = self.synthesizer.synthesize(user_request, request_id, &result).await;
        self.metrics.record_synthesis(synthesis.is_ok());
        let response = match synthesis {
            Ok(text) => text,
            Err(e) => {
                warn!(request_id, error = %e, "synthesis failed");
                String::new()
            }
        };

        if let Some(store) = &self.execution_store {
            if let Err(e) = store.record_execution(request_id, plan, &result).await {
                warn!(request_id, error = %e, "failed to record execution in execution store");
            }
        }

        Ok(OrchestratorResponse { request_id: request_id.to_string(), plan: plan.clone(), response, execution_result: Some(result), checkpoint: None, errors })
    }

    async fn record_completion(&self, request_id: &str, plan: &Plan, result: &ExecutionResult) {
        self.metrics.record_request(result.success, result.total_duration_ms).await;
        for step in &result.steps {
            self.metrics.record_agent_call(&step.agent_name).await;
        }

        let mut history = self.history.write().await;
        if history.len() == self.history_size {
            history.pop_front();
        }
        history.push_back(ExecutionRecord {
            request_id: request_id.to_string(),
            plan_id: plan.plan_id.clone(),
            success: result.success,
            total_duration_ms: result.total_duration_ms,
            recorded_at: chrono::Utc::now(),
        });
    }

    async fn build_plan_checkpoint(&self, plan: &Plan, request_id: &str, decision: InterruptDecision) -> Checkpoint {
        let timeout = std::time::Duration::from_secs(decision.timeout_secs.max(1));
        let checkpoint = Checkpoint {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            original_request_id: request_id.to_string(),
            status: CheckpointStatus::Pending,
            interrupt_point: InterruptPoint::PlanGenerated,
            plan: plan.clone(),
            current_step: None,
            step_results: Vec::new(),
            resolved_parameters: None,
            decision,
            request_mode: None,
            expires_at: chrono::Utc::now() + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(300)),
            user_context: Default::default(),
        };
        if let Some(store) = &self.checkpoint_store {
            store.save(checkpoint.clone()).await.ok();
        }
        checkpoint
    }

    pub async fn get_execution_history(&self) -> Vec<ExecutionRecord> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot().await
    }

    pub fn catalog(&self) -> &Arc<dyn CapabilityRegistry> {
        &self.catalog
    }
}

fn partial_result_from_checkpoint(checkpoint: &Checkpoint) -> ExecutionResult {
    ExecutionResult {
        plan_id: checkpoint.plan.plan_id.clone(),
        steps: checkpoint.step_results.clone(),
        success: false,
        total_duration_ms: 0,
        metadata: Some(serde_json::json!({"suspended_checkpoint_id": checkpoint.checkpoint_id})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::provider::LocalProvider;
    use async_trait::async_trait;
    use swarm_kernel::llm::{GenerateOptions, GenerateResponse, LlmError, TokenUsage};

    struct PlanningLlm;
    #[async_trait]
    impl LlmClient for PlanningLlm {
        async fn generate(&self, _prompt: &str, _options: GenerateOptions) -> Result<GenerateResponse, LlmError> {
            Ok(GenerateResponse {
                content: r#"{"plan_id":"p1","original_request":"r","steps":[]}"#.to_string(),
                model: "stub".into(),
                provider: "stub".into(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn config() -> OrchestratorConfig {
        let mut cfg = OrchestratorConfig::default();
        cfg.hitl.enabled = false;
        cfg
    }

    fn orchestrator() -> Orchestrator {
        let catalog: Arc<dyn CapabilityRegistry> = Arc::new(InMemoryCatalog::new());
        let llm: Arc<dyn LlmClient> = Arc::new(PlanningLlm);
        let provider: Arc<dyn CapabilityProvider> = Arc::new(LocalProvider::new(catalog.clone()));
        Orchestrator::new(catalog, llm, provider, &config())
    }

    #[tokio::test]
    async fn process_request_with_empty_plan_completes_and_records_history() {
        let orchestrator = orchestrator();
        let response = orchestrator.process_request("req-1", "do nothing", Default::default(), None).await.unwrap();
        assert!(response.checkpoint.is_none());
        assert!(response.execution_result.is_some());

        let history = orchestrator.get_execution_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request_id, "req-1");
    }

    #[tokio::test]
    async fn get_metrics_reflects_recorded_request() {
        let orchestrator = orchestrator();
        orchestrator.process_request("req-1", "do nothing", Default::default(), None).await.unwrap();
        let metrics = orchestrator.get_metrics().await;
        assert_eq!(metrics.requests_total, 1);
    }
}
