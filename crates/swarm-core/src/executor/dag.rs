//! DAG Executor (C8), §4.4.
//!
//! Cooperative parallel tasks bounded by a semaphore of width
//! `max_concurrency`; a step may start once every dependency has a
//! successful `StepResult`. One async function (`DagExecutor::execute`)
//! owns the whole run and drives a `tokio::task::JoinSet`, so the
//! in-progress result map needs no lock — only that one task ever touches
//! it, matching how `PriorityScheduler` scopes its own guards to avoid
//! cross-task contention.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_kernel::capability::{CapabilityRegistry, Service};
use swarm_kernel::checkpoint::{Checkpoint, CheckpointStatus, InterruptDecision, InterruptPoint};
use swarm_kernel::llm::LlmClient;
use swarm_kernel::plan::{ExecutionContext, ExecutionResult, Plan, Step, StepResult};
use swarm_kernel::retry::{retry_with_policy, RetryConfig};
use swarm_kernel::{KernelError, KernelResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::hitl::HitlController;
use crate::resolver::{self, ReResolverConfig, RefinementOutcome, ResolvedParams};

#[async_trait]
pub trait StepCompleteCallback: Send + Sync {
    async fn on_step_complete(&self, step_index: usize, total_steps: usize, step: &Step, result: &StepResult);
}

#[derive(Clone)]
pub struct ExecutorConfig {
    pub max_concurrency: usize,
    pub step_timeout: Duration,
    pub total_timeout: Duration,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
    pub max_validation_retries: usize,
    pub re_resolver: ReResolverConfig,
    /// Default progress-reporter callback, used when a given `execute` call
    /// passes `None`. A callback passed directly to `execute` is per-request
    /// context and always takes precedence over this one (§4.4 step 6).
    pub step_complete_callback: Option<Arc<dyn StepCompleteCallback>>,
}

impl std::fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("max_concurrency", &self.max_concurrency)
            .field("step_timeout", &self.step_timeout)
            .field("total_timeout", &self.total_timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("max_validation_retries", &self.max_validation_retries)
            .field("re_resolver", &self.re_resolver)
            .field("step_complete_callback", &self.step_complete_callback.is_some())
            .finish()
    }
}

impl From<&crate::config::OrchestratorConfig> for ExecutorConfig {
    fn from(cfg: &crate::config::OrchestratorConfig) -> Self {
        Self {
            max_concurrency: cfg.max_concurrency,
            step_timeout: cfg.step_timeout,
            total_timeout: cfg.orchestration_timeout,
            retry_attempts: cfg.retry_attempts,
            retry_delay: cfg.retry_delay,
            max_validation_retries: cfg.max_validation_retries,
            re_resolver: ReResolverConfig {
                enabled: cfg.semantic_retry_enabled,
                max_attempts: cfg.semantic_retry_max_attempts,
                enable_for_independent_steps: cfg.semantic_retry_independent_steps,
            },
            step_complete_callback: None,
        }
    }
}

pub enum ExecutionOutcome {
    Completed(ExecutionResult),
    Suspended(Checkpoint),
}

pub struct DagExecutor {
    http: reqwest::Client,
    catalog: Arc<dyn CapabilityRegistry>,
    llm: Arc<dyn LlmClient>,
    config: ExecutorConfig,
    hitl_config: Option<crate::config::HitlConfig>,
}

impl DagExecutor {
    pub fn new(catalog: Arc<dyn CapabilityRegistry>, llm: Arc<dyn LlmClient>, config: ExecutorConfig) -> Self {
        Self { http: reqwest::Client::new(), catalog, llm, config, hitl_config: None }
    }

    pub fn with_hitl(mut self, hitl_config: crate::config::HitlConfig) -> Self {
        self.hitl_config = Some(hitl_config);
        self
    }

    #[instrument(skip(self, plan, callback, cancellation), fields(plan_id = %plan.plan_id, steps = plan.steps.len()))]
    pub async fn execute(
        &self,
        plan: &Plan,
        user_query: &str,
        request_id: &str,
        callback: Option<&dyn StepCompleteCallback>,
        cancellation: &super::cancellation::CancellationToken,
    ) -> KernelResult<ExecutionOutcome> {
        let config_callback = self.config.step_complete_callback.clone();
        let callback: Option<&dyn StepCompleteCallback> = callback.or_else(|| config_callback.as_deref());
        let total_steps = plan.steps.len();
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut done: HashMap<String, StepResult> = HashMap::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut join_set: JoinSet<(String, StepResult)> = JoinSet::new();
        let mut consecutive_failures: u32 = 0;

        let hitl = self.hitl_config.as_ref().map(HitlController::new);

        loop {
            if cancellation.is_cancelled() {
                self.drain_cancelled(&mut join_set, &mut done, plan, total_steps, callback).await;
                return Ok(ExecutionOutcome::Completed(self.build_result(plan, done, start, false)));
            }

            let remaining_total = self.config.total_timeout.saturating_sub(start.elapsed());
            if remaining_total.is_zero() && !done.is_empty() {
                warn!("total timeout exhausted, failing remaining steps");
                self.fail_remaining(plan, &mut done, &in_flight, "total timeout exceeded");
                break;
            }

            let eligible = self.eligible_steps(plan, &done, &in_flight);
            self.skip_steps_with_failed_dependencies(plan, &mut done, &in_flight);

            if eligible.is_empty() && in_flight.is_empty() {
                break;
            }

            for step in eligible {
                if let Some(hitl) = &hitl {
                    let decision = hitl.decide_before_step(step);
                    if decision.should_interrupt {
                        self.await_in_flight(&mut join_set, &mut done, plan, total_steps, callback).await;
                        return Ok(ExecutionOutcome::Suspended(self.build_checkpoint(
                            plan,
                            request_id,
                            InterruptPoint::BeforeStep,
                            Some(step.step_id.clone()),
                            done.into_values().collect(),
                            decision,
                        )));
                    }
                }

                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                in_flight.insert(step.step_id.clone());
                let task = self.spawn_step(step.clone(), plan, &done, user_query, permit, cancellation.clone());
                join_set.spawn(task);
            }

            let Some(joined) = join_set.join_next().await else {
                continue;
            };
            let (step_id, result) = joined.map_err(|e| KernelError::Internal(format!("step task panicked: {e}")))?;
            in_flight.remove(&step_id);

            if !result.success {
                consecutive_failures += 1;
            } else {
                consecutive_failures = 0;
            }

            let index = plan.steps.iter().position(|s| s.step_id == step_id).unwrap_or(0);
            if let Some(cb) = callback {
                cb.on_step_complete(index, total_steps, plan.step(&step_id).expect("step exists"), &result).await;
            }

            if !result.success {
                if let Some(hitl) = &hitl {
                    let step = plan.step(&step_id).expect("step exists");
                    let decision = hitl.decide_on_error(step, consecutive_failures);
                    if decision.should_interrupt {
                        done.insert(step_id.clone(), result);
                        self.await_in_flight(&mut join_set, &mut done, plan, total_steps, callback).await;
                        return Ok(ExecutionOutcome::Suspended(self.build_checkpoint(
                            plan,
                            request_id,
                            InterruptPoint::OnError,
                            Some(step_id),
                            done.into_values().collect(),
                            decision,
                        )));
                    }
                }
            }

            done.insert(step_id, result);
        }

        let success = done.values().all(|r| r.success);
        Ok(ExecutionOutcome::Completed(self.build_result(plan, done, start, success)))
    }

    fn eligible_steps<'a>(&self, plan: &'a Plan, done: &HashMap<String, StepResult>, in_flight: &HashSet<String>) -> Vec<&'a Step> {
        plan.steps
            .iter()
            .filter(|s| !done.contains_key(&s.step_id) && !in_flight.contains(&s.step_id))
            .filter(|s| s.depends_on.iter().all(|d| done.get(d).map(|r| r.success).unwrap_or(false)))
            .filter(|s| !s.depends_on.iter().any(|d| done.get(d).map(|r| !r.success).unwrap_or(false)))
            .collect()
    }

    fn skip_steps_with_failed_dependencies(&self, plan: &Plan, done: &mut HashMap<String, StepResult>, in_flight: &HashSet<String>) {
        loop {
            let mut newly_skipped = Vec::new();
            for step in &plan.steps {
                if done.contains_key(&step.step_id) || in_flight.contains(&step.step_id) {
                    continue;
                }
                if step.depends_on.iter().any(|d| done.get(d).map(|r| !r.success).unwrap_or(false)) {
                    newly_skipped.push(step.step_id.clone());
                }
            }
            if newly_skipped.is_empty() {
                break;
            }
            let now = chrono::Utc::now();
            for step_id in newly_skipped {
                let step = plan.step(&step_id).expect("step exists");
                done.insert(
                    step_id.clone(),
                    StepResult {
                        step_id,
                        agent_name: step.agent_name.clone(),
                        response: String::new(),
                        success: false,
                        error: Some("dependency failed".to_string()),
                        duration_ms: 0,
                        attempts: 0,
                        start_time: now,
                        end_time: now,
                        metadata: None,
                    },
                );
            }
        }
    }

    fn fail_remaining(&self, plan: &Plan, done: &mut HashMap<String, StepResult>, in_flight: &HashSet<String>, reason: &str) {
        let now = chrono::Utc::now();
        for step in &plan.steps {
            if done.contains_key(&step.step_id) || in_flight.contains(&step.step_id) {
                continue;
            }
            done.insert(
                step.step_id.clone(),
                StepResult {
                    step_id: step.step_id.clone(),
                    agent_name: step.agent_name.clone(),
                    response: String::new(),
                    success: false,
                    error: Some(reason.to_string()),
                    duration_ms: 0,
                    attempts: 0,
                    start_time: now,
                    end_time: now,
                    metadata: None,
                },
            );
        }
    }

    async fn drain_cancelled(
        &self,
        join_set: &mut JoinSet<(String, StepResult)>,
        done: &mut HashMap<String, StepResult>,
        plan: &Plan,
        total_steps: usize,
        callback: Option<&dyn StepCompleteCallback>,
    ) {
        self.await_in_flight(join_set, done, plan, total_steps, callback).await;
        let now = chrono::Utc::now();
        for step in &plan.steps {
            done.entry(step.step_id.clone()).or_insert_with(|| StepResult {
                step_id: step.step_id.clone(),
                agent_name: step.agent_name.clone(),
                response: String::new(),
                success: false,
                error: Some("cancelled".to_string()),
                duration_ms: 0,
                attempts: 0,
                start_time: now,
                end_time: now,
                metadata: None,
            });
        }
    }

    async fn await_in_flight(
        &self,
        join_set: &mut JoinSet<(String, StepResult)>,
        done: &mut HashMap<String, StepResult>,
        plan: &Plan,
        total_steps: usize,
        callback: Option<&dyn StepCompleteCallback>,
    ) {
        while let Some(joined) = join_set.join_next().await {
            if let Ok((step_id, result)) = joined {
                let index = plan.steps.iter().position(|s| s.step_id == step_id).unwrap_or(0);
                if let Some(cb) = callback {
                    if let Some(step) = plan.step(&step_id) {
                        cb.on_step_complete(index, total_steps, step, &result).await;
                    }
                }
                done.insert(step_id, result);
            }
        }
    }

    fn build_result(&self, plan: &Plan, done: HashMap<String, StepResult>, start: Instant, success: bool) -> ExecutionResult {
        let mut steps: Vec<StepResult> = plan.steps.iter().filter_map(|s| done.get(&s.step_id).cloned()).collect();
        steps.sort_by_key(|r| plan.steps.iter().position(|s| s.step_id == r.step_id).unwrap_or(0));
        ExecutionResult { plan_id: plan.plan_id.clone(), steps, success, total_duration_ms: start.elapsed().as_millis() as u64, metadata: None }
    }

    fn build_checkpoint(
        &self,
        plan: &Plan,
        request_id: &str,
        interrupt_point: InterruptPoint,
        current_step: Option<String>,
        step_results: Vec<StepResult>,
        decision: InterruptDecision,
    ) -> Checkpoint {
        let timeout = Duration::from_secs(decision.timeout_secs.max(1));
        Checkpoint {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            original_request_id: request_id.to_string(),
            status: CheckpointStatus::Pending,
            interrupt_point,
            plan: plan.clone(),
            current_step,
            step_results,
            resolved_parameters: None,
            decision,
            request_mode: None,
            expires_at: chrono::Utc::now() + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(300)),
            user_context: HashMap::new(),
        }
    }

    fn spawn_step(
        &self,
        step: Step,
        plan: &Plan,
        done: &HashMap<String, StepResult>,
        user_query: &str,
        permit: tokio::sync::OwnedSemaphorePermit,
        cancellation: super::cancellation::CancellationToken,
    ) -> impl std::future::Future<Output = (String, StepResult)> + Send + 'static {
        let source_data: HashMap<String, serde_json::Value> = step.depends_on.iter().filter_map(|d| done.get(d).map(|r| (d.clone(), r.parsed_response()))).collect();
        let service = self.catalog.lookup(&step.agent_name);
        let http = self.http.clone();
        let llm = self.llm.clone();
        let config = self.config.clone();
        let user_query = user_query.to_string();
        let step_timeout = self.config.step_timeout;

        async move {
            let _permit = permit;
            let step_id = step.step_id.clone();
            let start_time = chrono::Utc::now();
            let started = Instant::now();

            let result = run_step(&http, &llm, service, &step, &source_data, &user_query, &config, step_timeout, &cancellation).await;

            let end_time = chrono::Utc::now();
            let duration_ms = started.elapsed().as_millis() as u64;
            let step_result = match result {
                Ok((response, attempts)) => {
                    StepResult { step_id: step_id.clone(), agent_name: step.agent_name.clone(), response, success: true, error: None, duration_ms, attempts, start_time, end_time, metadata: None }
                }
                Err((error, attempts)) => {
                    StepResult { step_id: step_id.clone(), agent_name: step.agent_name.clone(), response: String::new(), success: false, error: Some(error), duration_ms, attempts, start_time, end_time, metadata: None }
                }
            };
            (step_id, step_result)
        }
    }
}

async fn run_step(
    http: &reqwest::Client,
    llm: &Arc<dyn LlmClient>,
    service: Option<Service>,
    step: &Step,
    source_data: &HashMap<String, serde_json::Value>,
    user_query: &str,
    config: &ExecutorConfig,
    step_timeout: Duration,
    cancellation: &super::cancellation::CancellationToken,
) -> Result<(String, u32), (String, u32)> {
    let Some(service) = service else {
        return Err((format!("agent {:?} unavailable", step.agent_name), 0));
    };
    let Some(capability) = service.find_capability(&step.capability_name) else {
        return Err((format!("capability {:?} not found on agent {:?}", step.capability_name, step.agent_name), 0));
    };

    let mut resolved: ResolvedParams = resolver::resolve_initial(llm.as_ref(), capability, &step.parameters, user_query, source_data).await;
    let url = format!("{}{}", service.base_url(), capability.endpoint_path);
    let max_refine_attempts = config.max_validation_retries + config.re_resolver.max_attempts;
    let mut attempts = 0u32;
    let mut previous_errors = Vec::new();
    let mut layer3_attempts = 0usize;

    loop {
        attempts += 1;
        if cancellation.is_cancelled() {
            return Err(("cancelled".to_string(), attempts));
        }

        let dispatch = dispatch_with_transport_retry(http, &url, &resolved.params, step_timeout, config, cancellation).await;

        match dispatch {
            DispatchOutcome::Success(body) => return Ok((body, attempts)),
            DispatchOutcome::Cancelled => return Err(("cancelled".to_string(), attempts)),
            DispatchOutcome::Timeout => return Err((format!("step {} timed out", step.step_id), attempts)),
            DispatchOutcome::Failed { status, headers, body } => {
                if attempts as usize > max_refine_attempts {
                    return Err((format!("exhausted retries, last status {status}: {body}"), attempts));
                }

                let ctx = ExecutionContext {
                    user_query: user_query.to_string(),
                    source_data: source_data.clone(),
                    step_id: step.step_id.clone(),
                    capability: step.capability_name.clone(),
                    attempted_params: resolved.params.clone(),
                    error_response: Some(body.clone()),
                    http_status: Some(status),
                    retry_count: attempts.saturating_sub(1),
                    previous_errors: previous_errors.clone(),
                };

                match resolver::refine_after_error(
                    llm.as_ref(),
                    &mut resolved,
                    &config.re_resolver,
                    &step.capability_name,
                    status,
                    &headers,
                    &body,
                    &ctx,
                    &mut layer3_attempts,
                    config.max_validation_retries,
                )
                .await
                {
                    RefinementOutcome::Retry => {
                        previous_errors.push(format!("status {status}: {body}"));
                        continue;
                    }
                    RefinementOutcome::DelegateToTransportRetry => {
                        return Err((format!("transport retry exhausted, last status {status}: {body}"), attempts));
                    }
                    RefinementOutcome::Fatal | RefinementOutcome::GiveUp => {
                        return Err((format!("status {status}: {body}"), attempts));
                    }
                }
            }
        }
    }
}

enum DispatchOutcome {
    Success(String),
    Failed { status: u16, headers: HashMap<String, String>, body: String },
    Timeout,
    Cancelled,
}

fn is_transport_retryable(outcome: &DispatchOutcome) -> bool {
    matches!(outcome, DispatchOutcome::Failed { status, .. } if matches!(status, 408 | 429 | 500 | 502 | 504))
}

async fn dispatch_once(
    http: &reqwest::Client,
    url: &str,
    params: &swarm_kernel::capability::ParamMap,
    step_timeout: Duration,
    cancellation: &super::cancellation::CancellationToken,
) -> DispatchOutcome {
    let request = http.post(url).json(params).timeout(step_timeout).send();
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => DispatchOutcome::Cancelled,
        result = request => match result {
            Ok(resp) if resp.status().is_success() => {
                let body = resp.text().await.unwrap_or_default();
                DispatchOutcome::Success(body)
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let headers = resp.headers().iter().map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string())).collect();
                let body = resp.text().await.unwrap_or_default();
                DispatchOutcome::Failed { status, headers, body }
            }
            Err(e) if e.is_timeout() => DispatchOutcome::Timeout,
            Err(e) => DispatchOutcome::Failed { status: 0, headers: HashMap::new(), body: e.to_string() },
        },
    }
}

/// Retries only the transport-retryable outcomes (408/429/5xx); every other
/// outcome — success, cancellation, a non-retryable status, or a timeout —
/// is terminal for this call and returned as-is.
async fn dispatch_with_transport_retry(
    http: &reqwest::Client,
    url: &str,
    params: &swarm_kernel::capability::ParamMap,
    step_timeout: Duration,
    config: &ExecutorConfig,
    cancellation: &super::cancellation::CancellationToken,
) -> DispatchOutcome {
    let retry_config = RetryConfig::exponential(config.retry_attempts, config.retry_delay.as_millis() as u64, 30_000);

    let result: Result<DispatchOutcome, DispatchOutcome> = retry_with_policy(&retry_config, |e: &DispatchOutcome| is_transport_retryable(e), || async {
        let outcome = dispatch_once(http, url, params, step_timeout, cancellation).await;
        if is_transport_retryable(&outcome) {
            Err(outcome)
        } else {
            Ok(outcome)
        }
    })
    .await;

    match result {
        Ok(outcome) | Err(outcome) => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            max_concurrency: 5,
            step_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(120),
            retry_attempts: 2,
            retry_delay: Duration::from_secs(2),
            max_validation_retries: 2,
            re_resolver: ReResolverConfig::default(),
            step_complete_callback: None,
        }
    }

    fn executor() -> DagExecutor {
        let catalog = Arc::new(crate::catalog::InMemoryCatalog::new());
        let llm: Arc<dyn LlmClient> = Arc::new(NullLlm);
        DagExecutor::new(catalog, llm, config())
    }

    struct NullLlm;
    #[async_trait]
    impl LlmClient for NullLlm {
        async fn generate(&self, _prompt: &str, _options: swarm_kernel::llm::GenerateOptions) -> Result<swarm_kernel::llm::GenerateResponse, swarm_kernel::llm::LlmError> {
            Err(swarm_kernel::llm::LlmError("no llm in this test".into()))
        }
    }

    #[test]
    fn eligible_steps_requires_all_dependencies_succeeded() {
        let executor = executor();
        let mut plan = Plan::new("req");
        let mut b = Step::new("b", "agent", "cap");
        b.depends_on.insert("a".into());
        plan.steps = vec![Step::new("a", "agent", "cap"), b];

        let done = HashMap::new();
        let eligible = executor.eligible_steps(&plan, &done, &HashSet::new());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].step_id, "a");
    }

    #[test]
    fn skip_propagates_through_dependency_chain() {
        let executor = executor();
        let mut plan = Plan::new("req");
        let mut b = Step::new("b", "agent", "cap");
        b.depends_on.insert("a".into());
        let mut c = Step::new("c", "agent", "cap");
        c.depends_on.insert("b".into());
        plan.steps = vec![Step::new("a", "agent", "cap"), b, c];

        let mut done = HashMap::new();
        done.insert(
            "a".to_string(),
            StepResult { step_id: "a".into(), agent_name: "agent".into(), response: String::new(), success: false, error: Some("boom".into()), duration_ms: 0, attempts: 1, start_time: chrono::Utc::now(), end_time: chrono::Utc::now(), metadata: None },
        );

        executor.skip_steps_with_failed_dependencies(&plan, &mut done, &HashSet::new());
        assert_eq!(done["b"].error.as_deref(), Some("dependency failed"));
        assert_eq!(done["c"].error.as_deref(), Some("dependency failed"));
    }
}
