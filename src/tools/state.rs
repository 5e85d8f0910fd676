//! Tool-call state machine
//!
//! ```text
//! Requested ─┬─> AwaitingApproval ─┬─> Approved ─┬─> Executing ─┬─> Completed
//!            │                     │             │              └─> Failed
//!            ├─> Approved          └─> Denied    └─> Failed (no executor)
//!            └─> Denied
//! ```
//!
//! `Denied`, `Completed` and `Failed` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a call was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Policy table says `always_deny`
    Policy,
    /// An approver rejected the call
    User,
    /// No decision arrived before the approval timeout
    Timeout,
    /// The approval was withdrawn (agent disposed or turn canceled)
    Canceled,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Policy => "policy",
            DenialReason::User => "user",
            DenialReason::Timeout => "timeout",
            DenialReason::Canceled => "canceled",
        }
    }
}

/// Why an approved call did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No executor registered under the tool name
    NoExecutor,
    /// Executor returned an error or panicked
    ExecutorError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoExecutor => "no_executor",
            FailureReason::ExecutorError => "executor_error",
        }
    }
}

/// Lifecycle state of one tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ToolCallState {
    Requested,
    AwaitingApproval,
    Approved,
    Denied(DenialReason),
    Executing,
    Completed,
    Failed(FailureReason),
}

impl ToolCallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallState::Denied(_) | ToolCallState::Completed | ToolCallState::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCallState::Requested => "requested",
            ToolCallState::AwaitingApproval => "awaiting_approval",
            ToolCallState::Approved => "approved",
            ToolCallState::Denied(_) => "denied",
            ToolCallState::Executing => "executing",
            ToolCallState::Completed => "completed",
            ToolCallState::Failed(_) => "failed",
        }
    }

    fn can_transition_to(&self, next: &ToolCallState) -> bool {
        use ToolCallState::*;
        matches!(
            (self, next),
            (Requested, AwaitingApproval)
                | (Requested, Approved)
                | (Requested, Denied(_))
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Denied(_))
                | (Approved, Executing)
                | (Approved, Failed(FailureReason::NoExecutor))
                | (Executing, Completed)
                | (Executing, Failed(_))
        )
    }
}

impl std::fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolCallState::Denied(reason) => write!(f, "denied({})", reason.as_str()),
            ToolCallState::Failed(reason) => write!(f, "failed({})", reason.as_str()),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid tool call transition for {call_id}: {from} -> {to}")]
pub struct InvalidTransition {
    pub call_id: String,
    pub from: ToolCallState,
    pub to: ToolCallState,
}

/// A tool call tracked by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub state: ToolCallState,
    /// Result text once terminal (output, denial text, or failure message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            state: ToolCallState::Requested,
            output: None,
            requested_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting edges the state machine does not allow
    pub fn transition(&mut self, next: ToolCallState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(&next) {
            return Err(InvalidTransition {
                call_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_happy_path_with_approval() {
        let mut call = ToolCall::new("c1", "send_email", json!({}));
        call.transition(ToolCallState::AwaitingApproval).unwrap();
        call.transition(ToolCallState::Approved).unwrap();
        call.transition(ToolCallState::Executing).unwrap();
        call.transition(ToolCallState::Completed).unwrap();
        assert!(call.state.is_terminal());
    }

    #[test]
    fn test_auto_approved_path() {
        let mut call = ToolCall::new("c1", "get_weather", json!({}));
        call.transition(ToolCallState::Approved).unwrap();
        call.transition(ToolCallState::Executing).unwrap();
        call.transition(ToolCallState::Failed(FailureReason::ExecutorError))
            .unwrap();
        assert_eq!(call.state.to_string(), "failed(executor_error)");
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut call = ToolCall::new("c1", "rm", json!({}));
        call.transition(ToolCallState::Denied(DenialReason::Policy)).unwrap();

        let err = call.transition(ToolCallState::Approved).unwrap_err();
        assert_eq!(err.from, ToolCallState::Denied(DenialReason::Policy));
        assert!(err.to_string().contains("denied(policy) -> approved"));
    }

    #[test]
    fn test_cannot_execute_without_approval() {
        let mut call = ToolCall::new("c1", "x", json!({}));
        assert!(call.transition(ToolCallState::Executing).is_err());
        assert!(call.transition(ToolCallState::Completed).is_err());

        call.transition(ToolCallState::AwaitingApproval).unwrap();
        assert!(call.transition(ToolCallState::Executing).is_err());
    }

    #[test]
    fn test_no_executor_only_from_approved() {
        let mut call = ToolCall::new("c1", "x", json!({}));
        call.transition(ToolCallState::Approved).unwrap();
        call.transition(ToolCallState::Failed(FailureReason::NoExecutor))
            .unwrap();

        let mut call = ToolCall::new("c2", "x", json!({}));
        call.transition(ToolCallState::Approved).unwrap();
        assert!(call
            .transition(ToolCallState::Failed(FailureReason::ExecutorError))
            .is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_value(ToolCallState::Denied(DenialReason::Timeout)).unwrap();
        assert_eq!(json, json!({"state": "denied", "reason": "timeout"}));

        let json = serde_json::to_value(ToolCallState::Executing).unwrap();
        assert_eq!(json, json!({"state": "executing"}));
    }
}
