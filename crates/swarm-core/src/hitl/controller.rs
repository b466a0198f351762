//! HITL Controller (C9): a pure policy function, §4.5.
//!
//! No I/O, no state — just maps an interrupt point plus the step about to
//! run (or that just failed) onto an [`InterruptDecision`]. Everything
//! stateful (persistence, expiry) lives in [`super::checkpoint_store`] and
//! [`super::expiry`].

use crate::config::HitlConfig;
use swarm_kernel::checkpoint::{DefaultAction, InterruptDecision, InterruptPoint};
use swarm_kernel::plan::Step;

pub struct HitlController<'a> {
    config: &'a HitlConfig,
}

impl<'a> HitlController<'a> {
    pub fn new(config: &'a HitlConfig) -> Self {
        Self { config }
    }

    pub fn decide_on_plan(&self, _plan: &swarm_kernel::plan::Plan) -> InterruptDecision {
        if !self.config.enabled || !self.config.require_plan_approval {
            return InterruptDecision::no_interrupt();
        }
        InterruptDecision {
            should_interrupt: true,
            reason: "plan approval required before execution".to_string(),
            priority: 5,
            default_action: DefaultAction::from_interrupt_point(InterruptPoint::PlanGenerated),
            timeout_secs: self.config.default_timeout.as_secs(),
            metadata: Default::default(),
        }
    }

    pub fn decide_before_step(&self, step: &Step) -> InterruptDecision {
        if !self.config.enabled {
            return InterruptDecision::no_interrupt();
        }
        if self.config.sensitive_agents.contains(&step.agent_name) || self.config.sensitive_capabilities.contains(&step.capability_name) {
            return InterruptDecision {
                should_interrupt: true,
                reason: format!("step {} targets a sensitive agent or capability", step.step_id),
                priority: 8,
                default_action: DefaultAction::from_interrupt_point(InterruptPoint::BeforeStep),
                timeout_secs: self.config.default_timeout.as_secs(),
                metadata: Default::default(),
            };
        }
        InterruptDecision::no_interrupt()
    }

    pub fn decide_on_error(&self, step: &Step, consecutive_failures: u32) -> InterruptDecision {
        if !self.config.enabled {
            return InterruptDecision::no_interrupt();
        }
        if consecutive_failures < self.config.escalate_after_failures {
            return InterruptDecision::no_interrupt();
        }
        InterruptDecision {
            should_interrupt: true,
            reason: format!("step {} failed {consecutive_failures} consecutive times, escalating", step.step_id),
            priority: 9,
            default_action: DefaultAction::from_interrupt_point(InterruptPoint::OnError),
            timeout_secs: self.config.default_timeout.as_secs(),
            metadata: Default::default(),
        }
    }
}
