//! HITL checkpoint data model (§3 "Checkpoint", §4.5).

use crate::plan::{Plan, StepResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptPoint {
    PlanGenerated,
    BeforeStep,
    AfterStep,
    OnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    Streaming,
    NonStreaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    Edited,
    Rejected,
    Aborted,
    Expired,
    ExpiredApproved,
    ExpiredRejected,
    ExpiredAborted,
    Completed,
}

impl CheckpointStatus {
    /// A terminal status can never transition again (resume protocol
    /// rejects commands against terminal checkpoints).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckpointStatus::Pending)
    }

    /// The `expired_<action>` status produced by applying a given default
    /// action at expiry.
    pub fn expired_with_action(action: DefaultAction) -> Self {
        match action {
            DefaultAction::Approve => CheckpointStatus::ExpiredApproved,
            DefaultAction::Reject => CheckpointStatus::ExpiredRejected,
            DefaultAction::Abort => CheckpointStatus::ExpiredAborted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAction {
    Approve,
    Reject,
    Abort,
}

impl DefaultAction {
    /// Default derivation from interrupt point, per §4.5: "`on-error →
    /// abort`, everything else → `reject`".
    pub fn from_interrupt_point(point: InterruptPoint) -> Self {
        match point {
            InterruptPoint::OnError => DefaultAction::Abort,
            _ => DefaultAction::Reject,
        }
    }
}

/// Policy output from the HITL Controller — pure, side-effect-free (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptDecision {
    pub should_interrupt: bool,
    pub reason: String,
    pub priority: u8,
    pub default_action: DefaultAction,
    pub timeout_secs: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InterruptDecision {
    pub fn no_interrupt() -> Self {
        Self {
            should_interrupt: false,
            reason: String::new(),
            priority: 0,
            default_action: DefaultAction::Reject,
            timeout_secs: 0,
            metadata: HashMap::new(),
        }
    }
}

/// A durable snapshot of execution state used to pause and resume at a
/// human-oversight boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub request_id: String,
    pub original_request_id: String,
    pub status: CheckpointStatus,
    pub interrupt_point: InterruptPoint,
    pub plan: Plan,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub resolved_parameters: Option<HashMap<String, serde_json::Value>>,
    pub decision: InterruptDecision,
    /// Absent means "use the configured default" — see SPEC_FULL.md Open
    /// Question 1 for the resolved semantics.
    #[serde(default)]
    pub request_mode: Option<RequestMode>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub user_context: HashMap<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_action_on_error_is_abort() {
        assert_eq!(
            DefaultAction::from_interrupt_point(InterruptPoint::OnError),
            DefaultAction::Abort
        );
        assert_eq!(
            DefaultAction::from_interrupt_point(InterruptPoint::BeforeStep),
            DefaultAction::Reject
        );
    }

    #[test]
    fn expired_status_mirrors_action() {
        assert_eq!(
            CheckpointStatus::expired_with_action(DefaultAction::Reject),
            CheckpointStatus::ExpiredRejected
        );
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!CheckpointStatus::Pending.is_terminal());
        assert!(CheckpointStatus::Approved.is_terminal());
        assert!(CheckpointStatus::Expired.is_terminal());
    }
}
