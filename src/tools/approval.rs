//! Approval channel for tool calls that require a human (or policy service)
//! decision
//!
//! A request registers a pending entry, publishes [`ApprovalRequested`], and
//! hands the coordinator a oneshot receiver. Whoever listens for the event
//! answers through [`ApprovalChannel::resolve`]. The waiting side enforces
//! the timeout; [`ApprovalChannel::expire`] then withdraws the entry so late
//! answers are ignored.

use crate::event::{ApprovalRequested, ApprovalResolved, EventRouter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, RwLock};

/// Answer delivered to the waiting tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: Option<String> },
    /// Withdrawn by `cancel`/`cancel_all`
    Canceled,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }
}

/// Snapshot of a pending approval, for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApprovalInfo {
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub remaining_ms: u64,
}

struct PendingApproval {
    tool_name: String,
    arguments: serde_json::Value,
    created_at: Instant,
    timeout_ms: u64,
    response_tx: oneshot::Sender<ApprovalDecision>,
}

impl PendingApproval {
    fn remaining_ms(&self) -> u64 {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.timeout_ms.saturating_sub(elapsed)
    }

    fn is_timed_out(&self) -> bool {
        self.created_at.elapsed() > Duration::from_millis(self.timeout_ms)
    }
}

/// Pending approvals keyed by tool call id
pub struct ApprovalChannel {
    pending: RwLock<HashMap<String, PendingApproval>>,
    events: Arc<EventRouter>,
}

impl ApprovalChannel {
    pub fn new(events: Arc<EventRouter>) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Register a pending approval and announce it
    ///
    /// The receiver yields exactly one decision. It reports `RecvError` only
    /// if the entry is dropped without an answer, which `expire` does.
    pub async fn request(
        &self,
        id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        timeout_ms: u64,
    ) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.write().await;
            pending.insert(
                id.to_string(),
                PendingApproval {
                    tool_name: tool_name.to_string(),
                    arguments: arguments.clone(),
                    created_at: Instant::now(),
                    timeout_ms,
                    response_tx: tx,
                },
            );
        }

        tracing::debug!(call_id = id, tool = tool_name, timeout_ms, "Approval requested");
        self.events.publish(ApprovalRequested {
            id: id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            timeout_ms,
        });

        rx
    }

    /// Approve or reject a pending call
    ///
    /// Returns false when no such call is pending (already resolved, timed
    /// out, or unknown). Only the first resolution has any effect.
    pub async fn resolve(&self, id: &str, approved: bool) -> bool {
        self.resolve_with_reason(id, approved, None).await
    }

    pub async fn resolve_with_reason(
        &self,
        id: &str,
        approved: bool,
        reason: Option<String>,
    ) -> bool {
        let Some(entry) = self.pending.write().await.remove(id) else {
            tracing::debug!(call_id = id, "Ignoring resolution for unknown approval");
            return false;
        };

        let decision = if approved {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Rejected {
                reason: reason.clone(),
            }
        };
        if entry.response_tx.send(decision).is_err() {
            tracing::debug!(call_id = id, "Approval waiter is gone, resolution not applied");
            return false;
        }

        self.events.publish(ApprovalResolved {
            id: id.to_string(),
            approved,
            reason,
        });
        true
    }

    /// Withdraw a pending approval after its wait timed out
    pub async fn expire(&self, id: &str) -> bool {
        let Some(entry) = self.pending.write().await.remove(id) else {
            return false;
        };
        tracing::info!(call_id = id, tool = %entry.tool_name, "Approval timed out");
        self.events.publish(ApprovalResolved {
            id: id.to_string(),
            approved: false,
            reason: Some("timeout".to_string()),
        });
        true
    }

    /// Cancel one pending approval
    pub async fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.pending.write().await.remove(id) else {
            return false;
        };
        self.finish_canceled(id, entry);
        true
    }

    /// Cancel every pending approval; returns how many were pending
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.pending.write().await.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            self.finish_canceled(&id, entry);
        }
        if count > 0 {
            tracing::info!(count, "Canceled pending approvals");
        }
        count
    }

    /// Ids of entries whose deadline passed without an answer
    pub async fn timed_out(&self) -> Vec<String> {
        self.pending
            .read()
            .await
            .iter()
            .filter(|(_, p)| p.is_timed_out())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn pending(&self) -> Vec<PendingApprovalInfo> {
        let mut list: Vec<_> = self
            .pending
            .read()
            .await
            .iter()
            .map(|(id, p)| PendingApprovalInfo {
                id: id.clone(),
                tool_name: p.tool_name.clone(),
                arguments: p.arguments.clone(),
                remaining_ms: p.remaining_ms(),
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    fn finish_canceled(&self, id: &str, entry: PendingApproval) {
        self.events.publish(ApprovalResolved {
            id: id.to_string(),
            approved: false,
            reason: Some("canceled".to_string()),
        });
        let _ = entry.response_tx.send(ApprovalDecision::Canceled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn channel() -> (Arc<EventRouter>, ApprovalChannel) {
        let events = Arc::new(EventRouter::new());
        let approvals = ApprovalChannel::new(events.clone());
        (events, approvals)
    }

    #[tokio::test]
    async fn test_request_publishes_and_resolves() {
        let (events, approvals) = channel();
        let mut requested = events.subscribe_stream::<ApprovalRequested>();

        let rx = approvals
            .request("call-1", "send_email", &json!({"to": "a@b.c"}), 5_000)
            .await;

        let event = requested.next().await.unwrap();
        assert_eq!(event.id, "call-1");
        assert_eq!(event.tool_name, "send_email");
        assert_eq!(approvals.pending_count().await, 1);

        assert!(approvals.resolve("call-1", true).await);
        assert_eq!(rx.await.unwrap(), ApprovalDecision::Approved);
        assert_eq!(approvals.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let (_events, approvals) = channel();
        let rx = approvals.request("call-1", "rm", &json!({}), 5_000).await;

        assert!(approvals.resolve("call-1", false).await);
        assert!(!approvals.resolve("call-1", true).await);
        assert_eq!(
            rx.await.unwrap(),
            ApprovalDecision::Rejected { reason: None }
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let (_events, approvals) = channel();
        assert!(!approvals.resolve("nope", true).await);
    }

    #[tokio::test]
    async fn test_expire_drops_sender() {
        let (events, approvals) = channel();
        let mut resolved = events.subscribe_stream::<ApprovalResolved>();
        let rx = approvals.request("call-1", "rm", &json!({}), 0).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(approvals.timed_out().await, vec!["call-1".to_string()]);

        assert!(approvals.expire("call-1").await);
        assert!(rx.await.is_err());
        assert!(!approvals.resolve("call-1", true).await);

        let event = resolved.next().await.unwrap();
        assert!(!event.approved);
        assert_eq!(event.reason.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_resolution_without_waiter_is_not_reported() {
        let (events, approvals) = channel();
        let mut resolved = events.subscribe_stream::<ApprovalResolved>();
        let rx = approvals.request("call-1", "rm", &json!({}), 5_000).await;
        drop(rx);

        assert!(!approvals.resolve("call-1", true).await);
        assert_eq!(approvals.pending_count().await, 0);
        let event = tokio::time::timeout(Duration::from_millis(50), resolved.next()).await;
        assert!(event.is_err());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (_events, approvals) = channel();
        let rx1 = approvals.request("a", "t", &json!({}), 5_000).await;
        let rx2 = approvals.request("b", "t", &json!({}), 5_000).await;

        let pending = approvals.pending().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "a");
        assert!(pending[0].remaining_ms <= 5_000);

        assert_eq!(approvals.cancel_all().await, 2);
        assert_eq!(rx1.await.unwrap(), ApprovalDecision::Canceled);
        assert_eq!(rx2.await.unwrap(), ApprovalDecision::Canceled);
        assert_eq!(approvals.cancel_all().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_one() {
        let (_events, approvals) = channel();
        let rx = approvals.request("a", "t", &json!({}), 5_000).await;
        assert!(approvals.cancel("a").await);
        assert!(!approvals.cancel("a").await);
        assert!(!rx.await.unwrap().is_approved());
    }
}
