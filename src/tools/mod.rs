//! Tool-call coordination
//!
//! The coordinator owns every [`ToolCall`] from the moment the model asks for
//! it until it reaches a terminal state:
//!
//! - `policy` decides auto-approve / require-approval / deny per tool name
//! - `approval` suspends calls that need an external decision
//! - `registry` maps names to executors
//! - `state` validates each transition
//!
//! A batch is handled concurrently, but `Requested` events go out in request
//! order and outputs come back positionally matched to the requests.

pub mod approval;
pub mod policy;
pub mod registry;
pub mod state;

pub use approval::{ApprovalChannel, ApprovalDecision, PendingApprovalInfo};
pub use policy::{PolicyAction, ToolPolicy};
pub use registry::{ToolExecutor, ToolRegistry};
pub use state::{DenialReason, FailureReason, InvalidTransition, ToolCall, ToolCallState};

use crate::event::{EventRouter, ToolEvent};
use crate::types::{ToolCallRequest, ToolOutput};
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Finished calls kept for lookup after their turn ends
const RETAINED_TERMINAL_CALLS: usize = 256;

/// Tracked calls, shared with spawned executor tasks so a call that outlives
/// its turn still reaches a terminal state
///
/// Calls in flight are always kept. Terminal calls are evicted oldest first
/// once more than [`RETAINED_TERMINAL_CALLS`] have finished.
#[derive(Default)]
struct CallTable {
    inner: Mutex<Calls>,
}

#[derive(Default)]
struct Calls {
    by_id: HashMap<String, ToolCall>,
    /// Terminal call ids, oldest first
    finished: VecDeque<String>,
}

impl CallTable {
    fn insert(&self, call: ToolCall) {
        let id = call.id.clone();
        let mut calls = self.lock();
        if calls.by_id.insert(id.clone(), call).is_some() {
            calls.finished.retain(|finished| finished != &id);
        }
    }

    fn transition(&self, id: &str, next: ToolCallState, output: Option<&str>) {
        let mut calls = self.lock();
        let Some(call) = calls.by_id.get_mut(id) else {
            tracing::warn!(call_id = id, "Transition for untracked tool call");
            return;
        };
        match call.transition(next) {
            Ok(()) => {
                if let Some(output) = output {
                    call.output = Some(output.to_string());
                }
                if call.state.is_terminal() {
                    calls.finished.push_back(id.to_string());
                    while calls.finished.len() > RETAINED_TERMINAL_CALLS {
                        if let Some(old) = calls.finished.pop_front() {
                            calls.by_id.remove(&old);
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }

    fn get(&self, id: &str) -> Option<ToolCall> {
        self.lock().by_id.get(id).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Verdict {
    Approve,
    Deny(DenialReason),
}

/// Applies policy, waits for approvals, dispatches executors
pub struct ToolCallCoordinator {
    registry: Arc<ToolRegistry>,
    policy: RwLock<ToolPolicy>,
    approvals: Arc<ApprovalChannel>,
    events: Arc<EventRouter>,
    approval_timeout: Duration,
    table: Arc<CallTable>,
}

impl ToolCallCoordinator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        policy: ToolPolicy,
        approvals: Arc<ApprovalChannel>,
        events: Arc<EventRouter>,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            policy: RwLock::new(policy),
            approvals,
            events,
            approval_timeout,
            table: Arc::new(CallTable::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn approvals(&self) -> &Arc<ApprovalChannel> {
        &self.approvals
    }

    pub fn approval_timeout(&self) -> Duration {
        self.approval_timeout
    }

    pub fn policy(&self) -> ToolPolicy {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the policy table; applies to calls requested afterwards
    pub fn set_policy(&self, policy: ToolPolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Current state of a tracked call
    pub fn tool_call(&self, id: &str) -> Option<ToolCall> {
        self.table.get(id)
    }

    /// Calls currently suspended on an approval decision
    pub async fn pending_approvals(&self) -> Vec<PendingApprovalInfo> {
        self.approvals.pending().await
    }

    /// Drive a batch to terminal states and return outputs in request order
    ///
    /// Never fails: denials and executor errors become error outputs that
    /// are reported back to the model.
    pub async fn handle_tool_call_requests(
        &self,
        turn_id: &str,
        requests: &[ToolCallRequest],
    ) -> Vec<ToolOutput> {
        self.handle_with_cancel(turn_id, requests, &CancellationToken::new())
            .await
    }

    /// Like [`handle_tool_call_requests`](Self::handle_tool_call_requests),
    /// but pending approvals are withdrawn when `cancel` fires
    ///
    /// Calls already executing keep running to completion.
    pub async fn handle_with_cancel(
        &self,
        turn_id: &str,
        requests: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Vec<ToolOutput> {
        for request in requests {
            self.table.insert(ToolCall::new(
                &request.id,
                &request.name,
                request.arguments.clone(),
            ));
            self.events.publish(ToolEvent::Requested {
                turn_id: turn_id.to_string(),
                call_id: request.id.clone(),
                name: request.name.clone(),
                arguments: request.arguments.clone(),
            });
        }

        futures::future::join_all(
            requests
                .iter()
                .map(|request| self.process(turn_id, request, cancel)),
        )
        .await
    }

    async fn process(
        &self,
        turn_id: &str,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> ToolOutput {
        let action = self.policy().evaluate(&request.name);
        tracing::debug!(
            call_id = %request.id,
            tool = %request.name,
            action = action.as_str(),
            "Tool policy evaluated"
        );

        let verdict = match action {
            PolicyAction::AutoApprove => Verdict::Approve,
            PolicyAction::AlwaysDeny => Verdict::Deny(DenialReason::Policy),
            PolicyAction::RequireApproval => self.await_approval(turn_id, request, cancel).await,
        };

        if let Verdict::Deny(reason) = verdict {
            return self.deny(turn_id, request, reason);
        }
        self.table
            .transition(&request.id, ToolCallState::Approved, None);

        let Some(executor) = self.registry.get(&request.name) else {
            let message = format!("No executor registered for tool '{}'", request.name);
            tracing::warn!(call_id = %request.id, "{}", message);
            self.table.transition(
                &request.id,
                ToolCallState::Failed(FailureReason::NoExecutor),
                Some(&message),
            );
            self.events.publish(ToolEvent::Failed {
                turn_id: turn_id.to_string(),
                call_id: request.id.clone(),
                name: request.name.clone(),
                reason: FailureReason::NoExecutor.as_str().to_string(),
                message: message.clone(),
            });
            return error_output(request, message);
        };

        self.execute(turn_id, request, executor).await
    }

    async fn await_approval(
        &self,
        turn_id: &str,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Verdict {
        let timeout_ms = self.approval_timeout.as_millis() as u64;
        self.table
            .transition(&request.id, ToolCallState::AwaitingApproval, None);
        self.events.publish(ToolEvent::AwaitingApproval {
            turn_id: turn_id.to_string(),
            call_id: request.id.clone(),
            name: request.name.clone(),
            timeout_ms,
        });

        let mut guard = AbandonedApproval {
            coordinator: self,
            turn_id,
            request,
            armed: true,
        };

        let mut rx = self
            .approvals
            .request(&request.id, &request.name, &request.arguments, timeout_ms)
            .await;

        let waited = tokio::select! {
            outcome = tokio::time::timeout(self.approval_timeout, &mut rx) => outcome.map(Result::ok),
            _ = cancel.cancelled() => {
                self.approvals.cancel(&request.id).await;
                Ok(Some(ApprovalDecision::Canceled))
            }
        };
        let decision = match waited {
            Ok(decision) => decision,
            Err(_) => {
                if self.approvals.expire(&request.id).await {
                    None
                } else {
                    // A resolution that took the entry before expiry still counts
                    rx.await.ok()
                }
            }
        };
        let verdict = match decision {
            Some(ApprovalDecision::Approved) => Verdict::Approve,
            Some(ApprovalDecision::Rejected { .. }) => Verdict::Deny(DenialReason::User),
            Some(ApprovalDecision::Canceled) => Verdict::Deny(DenialReason::Canceled),
            // Sender dropped: the entry was expired without an answer
            None => Verdict::Deny(DenialReason::Timeout),
        };
        guard.armed = false;
        verdict
    }

    fn deny(&self, turn_id: &str, request: &ToolCallRequest, reason: DenialReason) -> ToolOutput {
        let message = format!(
            "Tool call '{}' was denied (reason: {})",
            request.name,
            reason.as_str()
        );
        tracing::info!(call_id = %request.id, tool = %request.name, reason = reason.as_str(), "Tool call denied");
        self.table
            .transition(&request.id, ToolCallState::Denied(reason), Some(&message));
        self.events.publish(ToolEvent::Denied {
            turn_id: turn_id.to_string(),
            call_id: request.id.clone(),
            name: request.name.clone(),
            reason: reason.as_str().to_string(),
        });
        error_output(request, message)
    }

    async fn execute(
        &self,
        turn_id: &str,
        request: &ToolCallRequest,
        executor: Arc<dyn ToolExecutor>,
    ) -> ToolOutput {
        self.table
            .transition(&request.id, ToolCallState::Executing, None);
        self.events.publish(ToolEvent::Started {
            turn_id: turn_id.to_string(),
            call_id: request.id.clone(),
            name: request.name.clone(),
        });

        let span = tracing::info_span!(
            "a3s.tool.execute",
            a3s.tool.name = %request.name,
            a3s.tool.call_id = %request.id,
            a3s.tool.success = tracing::field::Empty,
            a3s.tool.duration_ms = tracing::field::Empty,
        );

        // Spawned so the call finishes and is recorded even if the turn is
        // canceled while it runs.
        let table = self.table.clone();
        let events = self.events.clone();
        let turn_id = turn_id.to_string();
        let task_request = request.clone();
        let handle = tokio::spawn(
            async move {
                let request = task_request;
                let started = Instant::now();
                let result = AssertUnwindSafe(executor.execute(&request.arguments))
                    .catch_unwind()
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                let result = match result {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("Tool '{}' panicked", request.name)),
                };

                let span = tracing::Span::current();
                span.record("a3s.tool.duration_ms", duration_ms);
                span.record("a3s.tool.success", result.is_ok());

                match result {
                    Ok(content) => {
                        table.transition(&request.id, ToolCallState::Completed, Some(&content));
                        events.publish(ToolEvent::Completed {
                            turn_id,
                            call_id: request.id.clone(),
                            name: request.name.clone(),
                            output: content.clone(),
                            duration_ms,
                        });
                        ToolOutput {
                            call_id: request.id,
                            name: request.name,
                            content,
                            is_error: false,
                        }
                    }
                    Err(e) => {
                        let message = format!("Error: {}", e);
                        tracing::warn!(call_id = %request.id, error = %e, "Tool execution failed");
                        table.transition(
                            &request.id,
                            ToolCallState::Failed(FailureReason::ExecutorError),
                            Some(&message),
                        );
                        events.publish(ToolEvent::Failed {
                            turn_id,
                            call_id: request.id.clone(),
                            name: request.name.clone(),
                            reason: FailureReason::ExecutorError.as_str().to_string(),
                            message: message.clone(),
                        });
                        error_output(&request, message)
                    }
                }
            }
            .instrument(span),
        );

        match handle.await {
            Ok(output) => output,
            Err(e) => {
                // Only reachable if the runtime is shutting down
                let message = format!("Error: tool task aborted: {}", e);
                self.table.transition(
                    &request.id,
                    ToolCallState::Failed(FailureReason::ExecutorError),
                    Some(&message),
                );
                error_output(request, message)
            }
        }
    }
}

/// Withdraws an approval whose waiting future was dropped mid-wait (the
/// owning turn was aborted)
struct AbandonedApproval<'a> {
    coordinator: &'a ToolCallCoordinator,
    turn_id: &'a str,
    request: &'a ToolCallRequest,
    armed: bool,
}

impl Drop for AbandonedApproval<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.coordinator
            .deny(self.turn_id, self.request, DenialReason::Canceled);

        let approvals = self.coordinator.approvals.clone();
        let id = self.request.id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                approvals.cancel(&id).await;
            });
        }
    }
}

fn error_output(request: &ToolCallRequest, content: String) -> ToolOutput {
    ToolOutput {
        call_id: request.id.clone(),
        name: request.name.clone(),
        content,
        is_error: true,
    }
}
