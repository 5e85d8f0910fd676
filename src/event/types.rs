//! Event payloads published by the orchestration core
//!
//! Each family is its own type so subscribers only receive what they asked
//! for: turn lifecycle, text deltas, tool lifecycle, approval requests,
//! errors, status transitions, and memory indexing.

use crate::agent::AgentStatus;
use crate::error::ErrorCategory;
use crate::types::TokenUsage;
use serde::{Deserialize, Serialize};

/// Turn lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Started {
        conversation_id: String,
        turn_id: String,
        input: String,
    },
    Completed {
        conversation_id: String,
        turn_id: String,
        text: String,
        rounds: usize,
        usage: TokenUsage,
    },
    Canceled {
        conversation_id: String,
        turn_id: String,
    },
}

impl TurnEvent {
    pub fn turn_id(&self) -> &str {
        match self {
            TurnEvent::Started { turn_id, .. }
            | TurnEvent::Completed { turn_id, .. }
            | TurnEvent::Canceled { turn_id, .. } => turn_id,
        }
    }
}

/// Incremental model output, in generation order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDelta {
    pub conversation_id: String,
    pub turn_id: String,
    /// Position of this delta within the turn, starting at 0
    pub sequence: u64,
    pub text: String,
}

/// Tool-call lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    Requested {
        turn_id: String,
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    AwaitingApproval {
        turn_id: String,
        call_id: String,
        name: String,
        timeout_ms: u64,
    },
    Started {
        turn_id: String,
        call_id: String,
        name: String,
    },
    Completed {
        turn_id: String,
        call_id: String,
        name: String,
        output: String,
        duration_ms: u64,
    },
    Failed {
        turn_id: String,
        call_id: String,
        name: String,
        reason: String,
        message: String,
    },
    Denied {
        turn_id: String,
        call_id: String,
        name: String,
        reason: String,
    },
}

impl ToolEvent {
    pub fn call_id(&self) -> &str {
        match self {
            ToolEvent::Requested { call_id, .. }
            | ToolEvent::AwaitingApproval { call_id, .. }
            | ToolEvent::Started { call_id, .. }
            | ToolEvent::Completed { call_id, .. }
            | ToolEvent::Failed { call_id, .. }
            | ToolEvent::Denied { call_id, .. } => call_id,
        }
    }
}

/// A tool call is waiting for an external approve/deny decision
///
/// Resolve it with [`ApprovalChannel::resolve`](crate::tools::approval::ApprovalChannel::resolve).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequested {
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub timeout_ms: u64,
}

/// A pending approval was decided (by a caller, a timeout, or cancellation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResolved {
    pub id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A turn-level failure, mirrored from the `Err` returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
}

/// Agent status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub agent_id: String,
    pub from: AgentStatus,
    pub to: AgentStatus,
}

/// Long-term memory activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryEvent {
    Indexed {
        conversation_id: String,
        records: usize,
    },
    IndexFailed {
        conversation_id: String,
        error: String,
    },
    RetrievalDegraded {
        conversation_id: String,
        error: String,
    },
}
