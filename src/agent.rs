//! Agent: the per-conversation turn orchestrator
//!
//! ```text
//! Uninitialized → Initializing → Ready ⇄ Processing ⇄ AwaitingToolResult
//!                                  ↑          │
//!                                  └─ Error ←─┘        (any) → Stopped
//! ```
//!
//! One turn at a time: `send` while a turn is running is rejected, not
//! queued. Everything a turn produces (the user input included) is staged
//! and committed to the conversation only when the turn succeeds, so a
//! canceled or failed turn leaves the conversation exactly as it was.

use crate::chat::{ChatApiClient, ChatEvent};
use crate::config::{AgentConfig, OrchestratorConfig, Parameters};
use crate::error::{AgentError, ConfigError, Result};
use crate::event::{ErrorEvent, EventRouter, StatusChanged, TextDelta, TurnEvent};
use crate::memory::MemoryEngine;
use crate::store::{ConversationStore, MemoryConversationStore};
use crate::tools::{ApprovalChannel, ToolCallCoordinator, ToolPolicy, ToolRegistry};
use crate::types::{
    new_id, Conversation, ConversationItem, TokenUsage, ToolCallRequest, ToolOutput,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Uninitialized,
    Initializing,
    Ready,
    Processing,
    AwaitingToolResult,
    Error,
    Stopped,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Uninitialized => "uninitialized",
            AgentStatus::Initializing => "initializing",
            AgentStatus::Ready => "ready",
            AgentStatus::Processing => "processing",
            AgentStatus::AwaitingToolResult => "awaiting_tool_result",
            AgentStatus::Error => "error",
            AgentStatus::Stopped => "stopped",
        }
    }

    /// A turn is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, AgentStatus::Processing | AgentStatus::AwaitingToolResult)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResponse {
    pub turn_id: String,
    pub conversation_id: String,
    /// Final assistant text
    pub text: String,
    /// Items committed to the conversation by this turn, user input first
    pub items: Vec<ConversationItem>,
    /// Outputs of every tool call made during the turn, in request order
    pub tool_outputs: Vec<ToolOutput>,
    /// Number of tool rounds
    pub rounds: usize,
    pub usage: TokenUsage,
    /// Long-term retrieval failed and the context was recency-only
    pub retrieval_degraded: bool,
}

/// What one provider round trip produced
struct Completion {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
    usage: TokenUsage,
}

/// Turn output before commit
struct StagedTurn {
    text: String,
    items: Vec<ConversationItem>,
    tool_outputs: Vec<ToolOutput>,
    rounds: usize,
    usage: TokenUsage,
    degraded: bool,
}

/// Per-turn identifiers and delta sequencing
struct TurnScope<'a> {
    turn_id: &'a str,
    conversation_id: &'a str,
    cancel: &'a CancellationToken,
    next_sequence: u64,
}

/// Conversation orchestrator
///
/// Collaborators are injected through [`AgentBuilder`].
pub struct Agent {
    id: String,
    chat: Arc<dyn ChatApiClient>,
    memory: Arc<MemoryEngine>,
    tools: Arc<ToolCallCoordinator>,
    events: Arc<EventRouter>,
    store: Arc<dyn ConversationStore>,
    config: AgentConfig,
    parameters: Mutex<Parameters>,
    conversation: RwLock<Conversation>,
    /// Load this conversation on `initialize` instead of creating one
    resume: bool,
    status: watch::Sender<AgentStatus>,
    active_turn: Mutex<Option<CancellationToken>>,
    /// Set when an incremental write failed; the next commit saves in full
    needs_full_save: AtomicBool,
    /// Committed items not yet durable, indexed once a save succeeds
    unindexed: Mutex<Vec<ConversationItem>>,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<AgentStatus> {
        self.status.subscribe()
    }

    pub fn events(&self) -> &Arc<EventRouter> {
        &self.events
    }

    pub fn tools(&self) -> &Arc<ToolCallCoordinator> {
        &self.tools
    }

    pub fn memory(&self) -> &Arc<MemoryEngine> {
        &self.memory
    }

    /// Channel on which external collaborators approve or deny tool calls
    pub fn approvals(&self) -> Arc<ApprovalChannel> {
        self.tools.approvals().clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Snapshot of the committed conversation
    pub async fn conversation(&self) -> Conversation {
        self.conversation.read().await.clone()
    }

    pub async fn conversation_id(&self) -> String {
        self.conversation.read().await.id.clone()
    }

    pub fn parameters(&self) -> Parameters {
        lock(&self.parameters).clone()
    }

    /// Replace the parameters; a running turn keeps the snapshot it took
    pub fn set_parameters(&self, parameters: Parameters) {
        *lock(&self.parameters) = parameters;
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create (or load) the conversation and become `Ready`
    pub async fn initialize(&self) -> Result<()> {
        self.transition(&[AgentStatus::Uninitialized], AgentStatus::Initializing)
            .map_err(|current| self.reject(current))?;

        match self.prepare_conversation().await {
            Ok(()) => {
                self.transition(&[AgentStatus::Initializing], AgentStatus::Ready)
                    .map_err(|current| self.reject(current))?;
                tracing::info!(agent_id = %self.id, "Agent ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(agent_id = %self.id, error = %e, "Agent initialization failed");
                let _ = self.transition(&[AgentStatus::Initializing], AgentStatus::Error);
                self.publish_error(None, &e).await;
                Err(e)
            }
        }
    }

    async fn prepare_conversation(&self) -> Result<()> {
        let mut conversation = self.conversation.write().await;
        if self.resume {
            if let Some(stored) = self.store.load(&conversation.id).await? {
                tracing::debug!(
                    conversation_id = %stored.id,
                    items = stored.len(),
                    "Resumed conversation"
                );
                *conversation = stored;
                return Ok(());
            }
        }
        self.store.create(&conversation).await?;
        Ok(())
    }

    /// Leave `Error` and accept turns again
    pub fn recover(&self) -> Result<()> {
        self.transition(&[AgentStatus::Error], AgentStatus::Ready)
            .map(|_| ())
            .map_err(|current| self.reject(current))
    }

    /// Cancel the running turn; returns false when no turn is running
    pub fn cancel(&self) -> bool {
        match lock(&self.active_turn).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop the agent for good
    ///
    /// Cancels the running turn and withdraws pending approvals.
    pub async fn dispose(&self) {
        let previous = self.status();
        if previous == AgentStatus::Stopped {
            return;
        }
        self.status.send_replace(AgentStatus::Stopped);
        self.events.publish(StatusChanged {
            agent_id: self.id.clone(),
            from: previous,
            to: AgentStatus::Stopped,
        });

        self.cancel();
        self.tools.approvals().cancel_all().await;
        tracing::info!(agent_id = %self.id, "Agent stopped");
    }

    // ========================================================================
    // Conversation management
    // ========================================================================

    /// Set or clear the summary prepended to future contexts
    pub async fn set_summary(&self, summary: Option<String>) -> Result<()> {
        self.ensure_not_stopped()?;
        let snapshot = {
            let mut conversation = self.conversation.write().await;
            conversation.set_summary(summary);
            conversation.clone()
        };
        self.store.save(&snapshot).await?;
        self.needs_full_save.store(false, Ordering::SeqCst);
        let unindexed = self.take_unindexed();
        if self.parameters().memory.use_vector_store {
            self.index_durable(&snapshot.id, unindexed);
        }
        Ok(())
    }

    /// Delete the conversation and its memory records, then start a fresh one
    pub async fn delete_conversation(&self) -> Result<()> {
        let status = self.status();
        if !matches!(status, AgentStatus::Ready | AgentStatus::Error) {
            return Err(self.reject(status));
        }

        let mut conversation = self.conversation.write().await;
        self.store.delete(&conversation.id).await?;
        if let Err(e) = self.memory.delete_thread(&conversation.id).await {
            tracing::warn!(conversation_id = %conversation.id, error = %e, "Failed to delete memory records");
        }

        let fresh = Conversation::new(self.id.clone());
        self.store.create(&fresh).await?;
        tracing::info!(old = %conversation.id, new = %fresh.id, "Conversation deleted");
        *conversation = fresh;
        self.needs_full_save.store(false, Ordering::SeqCst);
        self.take_unindexed();
        Ok(())
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Run one turn with `input`
    pub async fn send(&self, input: &str) -> Result<TurnResponse> {
        self.send_with_cancel(input, CancellationToken::new()).await
    }

    /// Run one turn that aborts when `cancel` fires
    ///
    /// On cancellation the conversation is left unchanged, the agent returns
    /// to `Ready`, and `AgentError::Canceled` is returned.
    pub async fn send_with_cancel(
        &self,
        input: &str,
        cancel: CancellationToken,
    ) -> Result<TurnResponse> {
        self.transition(&[AgentStatus::Ready], AgentStatus::Processing)
            .map_err(|current| self.reject(current))?;

        let token = cancel.child_token();
        *lock(&self.active_turn) = Some(token.clone());

        let turn_id = new_id("turn");
        let conversation = self.conversation().await;
        let mut params = self.parameters();
        if params.tools.is_empty() {
            params.tools = self.tools.registry().definitions();
        }
        let user_item = ConversationItem::user(input);

        self.events.publish(TurnEvent::Started {
            conversation_id: conversation.id.clone(),
            turn_id: turn_id.clone(),
            input: input.to_string(),
        });

        let span = tracing::info_span!(
            "a3s.agent.turn",
            a3s.agent.id = %self.id,
            a3s.turn.id = %turn_id,
            a3s.turn.rounds = tracing::field::Empty,
            a3s.llm.total_tokens = tracing::field::Empty,
        );

        let outcome = {
            let mut scope = TurnScope {
                turn_id: &turn_id,
                conversation_id: &conversation.id,
                cancel: &token,
                next_sequence: 0,
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(AgentError::Canceled),
                staged = self
                    .run_turn(&mut scope, &conversation, &user_item, &params)
                    .instrument(span.clone()) => staged,
            }
        };
        *lock(&self.active_turn) = None;

        match outcome {
            Ok(staged) => {
                span.record("a3s.turn.rounds", staged.rounds);
                span.record("a3s.llm.total_tokens", staged.usage.total_tokens);
                Ok(self
                    .commit(turn_id, user_item, staged, &params)
                    .instrument(span)
                    .await)
            }
            Err(AgentError::Canceled) => {
                tracing::info!(turn_id = %turn_id, "Turn canceled");
                let _ = self.transition(
                    &[AgentStatus::Processing, AgentStatus::AwaitingToolResult],
                    AgentStatus::Ready,
                );
                self.events.publish(TurnEvent::Canceled {
                    conversation_id: conversation.id.clone(),
                    turn_id,
                });
                Err(AgentError::Canceled)
            }
            Err(e) => {
                tracing::error!(turn_id = %turn_id, error = %e, "Turn failed");
                let _ = self.transition(
                    &[AgentStatus::Processing, AgentStatus::AwaitingToolResult],
                    AgentStatus::Error,
                );
                self.publish_error(Some(&turn_id), &e).await;
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        scope: &mut TurnScope<'_>,
        conversation: &Conversation,
        user_item: &ConversationItem,
        params: &Parameters,
    ) -> Result<StagedTurn> {
        let assembled = self
            .memory
            .assemble_context(conversation, user_item, &params.memory)
            .await;
        let degraded = assembled.degraded.is_some();
        let mut context = assembled.items;

        let mut staged = StagedTurn {
            text: String::new(),
            items: Vec::new(),
            tool_outputs: Vec::new(),
            rounds: 0,
            usage: TokenUsage::default(),
            degraded,
        };

        loop {
            let completion = self.complete(scope, &context, params).await?;
            staged.usage.accumulate(&completion.usage);

            if completion.tool_calls.is_empty() {
                staged.items.push(ConversationItem::assistant(&completion.text));
                staged.text = completion.text;
                return Ok(staged);
            }

            staged.rounds += 1;
            if staged.rounds > self.config.max_tool_rounds {
                tracing::warn!(
                    max_rounds = self.config.max_tool_rounds,
                    "Model kept requesting tools past the round limit"
                );
                return Err(AgentError::ToolLoopExceeded {
                    max_rounds: self.config.max_tool_rounds,
                });
            }

            let mut round_items = Vec::with_capacity(completion.tool_calls.len() * 2 + 1);
            if !completion.text.is_empty() {
                round_items.push(ConversationItem::assistant(&completion.text));
            }
            round_items.extend(completion.tool_calls.iter().map(ConversationItem::tool_call));

            let _ = self.transition(&[AgentStatus::Processing], AgentStatus::AwaitingToolResult);
            let outputs = self
                .tools
                .handle_with_cancel(scope.turn_id, &completion.tool_calls, scope.cancel)
                .await;
            let _ = self.transition(&[AgentStatus::AwaitingToolResult], AgentStatus::Processing);

            round_items.extend(outputs.iter().map(ConversationItem::tool_output));
            context.extend(round_items.iter().cloned());
            staged.items.extend(round_items);
            staged.tool_outputs.extend(outputs);
        }
    }

    /// One provider round trip, retrying transient failures at request start
    async fn complete(
        &self,
        scope: &mut TurnScope<'_>,
        context: &[ConversationItem],
        params: &Parameters,
    ) -> Result<Completion> {
        let span = tracing::info_span!(
            "a3s.llm.completion",
            a3s.llm.model = %params.model,
            a3s.llm.context_items = context.len(),
            a3s.llm.prompt_tokens = tracing::field::Empty,
            a3s.llm.completion_tokens = tracing::field::Empty,
            a3s.llm.total_tokens = tracing::field::Empty,
        );

        async {
            let mut attempt = 0;
            let rx = loop {
                match self.chat.send(context, params).await {
                    Ok(rx) => break rx,
                    Err(e) if e.is_transient() && attempt < self.config.retry.max_retries => {
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = self.config.retry.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient provider error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(AgentError::from(e)),
                }
            };

            let completion = self.consume_stream(scope, rx).await?;
            let span = tracing::Span::current();
            span.record("a3s.llm.prompt_tokens", completion.usage.prompt_tokens);
            span.record("a3s.llm.completion_tokens", completion.usage.completion_tokens);
            span.record("a3s.llm.total_tokens", completion.usage.total_tokens);
            Ok(completion)
        }
        .instrument(span)
        .await
    }

    async fn consume_stream(
        &self,
        scope: &mut TurnScope<'_>,
        mut rx: mpsc::Receiver<ChatEvent>,
    ) -> Result<Completion> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    self.events.publish(TextDelta {
                        conversation_id: scope.conversation_id.to_string(),
                        turn_id: scope.turn_id.to_string(),
                        sequence: scope.next_sequence,
                        text: delta,
                    });
                    scope.next_sequence += 1;
                }
                ChatEvent::ToolCallRequest(request) => {
                    tracing::debug!(call_id = %request.id, tool = %request.name, "Model requested tool");
                    tool_calls.push(request);
                }
                ChatEvent::Done { usage } => {
                    return Ok(Completion {
                        text,
                        tool_calls,
                        usage,
                    })
                }
                ChatEvent::Error(e) => return Err(AgentError::from(e)),
            }
        }

        Err(AgentError::Protocol(
            "response stream ended without a terminal event".to_string(),
        ))
    }

    /// Append the staged items, persist, index, and report completion
    async fn commit(
        &self,
        turn_id: String,
        user_item: ConversationItem,
        staged: StagedTurn,
        params: &Parameters,
    ) -> TurnResponse {
        let mut items = Vec::with_capacity(staged.items.len() + 1);
        items.push(user_item);
        items.extend(staged.items);

        let (conversation_id, full_snapshot) = {
            let mut conversation = self.conversation.write().await;
            conversation.append(items.iter().cloned());
            let snapshot = self
                .needs_full_save
                .load(Ordering::SeqCst)
                .then(|| conversation.clone());
            (conversation.id.clone(), snapshot)
        };

        // Only durable items are indexed
        if self.persist(&conversation_id, &items, full_snapshot).await {
            let mut durable = self.take_unindexed();
            durable.extend(items.iter().cloned());
            if params.memory.use_vector_store {
                self.index_durable(&conversation_id, durable);
            }
        } else {
            self.lock_unindexed().extend(items.iter().cloned());
        }

        let _ = self.transition(
            &[AgentStatus::Processing, AgentStatus::AwaitingToolResult],
            AgentStatus::Ready,
        );
        tracing::info!(
            turn_id = %turn_id,
            rounds = staged.rounds,
            total_tokens = staged.usage.total_tokens,
            "Turn completed"
        );
        self.events.publish(TurnEvent::Completed {
            conversation_id: conversation_id.clone(),
            turn_id: turn_id.clone(),
            text: staged.text.clone(),
            rounds: staged.rounds,
            usage: staged.usage.clone(),
        });

        TurnResponse {
            turn_id,
            conversation_id,
            text: staged.text,
            items,
            tool_outputs: staged.tool_outputs,
            rounds: staged.rounds,
            usage: staged.usage,
            retrieval_degraded: staged.degraded,
        }
    }

    async fn persist(
        &self,
        conversation_id: &str,
        items: &[ConversationItem],
        full_snapshot: Option<Conversation>,
    ) -> bool {
        let result = match &full_snapshot {
            Some(snapshot) => self.store.save(snapshot).await,
            None => self.store.save_items(conversation_id, items).await,
        };
        match result {
            Ok(()) => {
                self.needs_full_save.store(false, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    backend = self.store.backend_name(),
                    error = %e,
                    "Failed to persist turn, will retry with a full save"
                );
                self.needs_full_save.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    fn index_durable(&self, conversation_id: &str, items: Vec<ConversationItem>) {
        if items.is_empty() || !self.memory.has_embedder() {
            return;
        }
        self.memory
            .spawn_indexing(conversation_id.to_string(), items);
    }

    fn take_unindexed(&self) -> Vec<ConversationItem> {
        std::mem::take(&mut *self.lock_unindexed())
    }

    fn lock_unindexed(&self) -> std::sync::MutexGuard<'_, Vec<ConversationItem>> {
        self.unindexed.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Status helpers
    // ========================================================================

    /// Compare-and-set: move to `to` if the current status is in `allowed`
    ///
    /// Returns the previous status, or the current one on mismatch.
    fn transition(
        &self,
        allowed: &[AgentStatus],
        to: AgentStatus,
    ) -> std::result::Result<AgentStatus, AgentStatus> {
        let mut outcome = Err(to);
        self.status.send_if_modified(|current| {
            if allowed.contains(current) {
                outcome = Ok(*current);
                let changed = *current != to;
                *current = to;
                changed
            } else {
                outcome = Err(*current);
                false
            }
        });

        if let Ok(from) = outcome {
            if from != to {
                tracing::debug!(agent_id = %self.id, from = %from, to = %to, "Agent status changed");
                self.events.publish(StatusChanged {
                    agent_id: self.id.clone(),
                    from,
                    to,
                });
            }
        }
        outcome
    }

    fn reject(&self, current: AgentStatus) -> AgentError {
        match current {
            AgentStatus::Stopped => AgentError::Stopped,
            other => AgentError::NotReady(other.to_string()),
        }
    }

    fn ensure_not_stopped(&self) -> Result<()> {
        match self.status() {
            AgentStatus::Stopped => Err(AgentError::Stopped),
            _ => Ok(()),
        }
    }

    async fn publish_error(&self, turn_id: Option<&str>, error: &AgentError) {
        self.events.publish(ErrorEvent {
            conversation_id: self.conversation.read().await.id.clone(),
            turn_id: turn_id.map(str::to_string),
            category: error.category(),
            message: error.to_string(),
        });
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for creating an agent
pub struct AgentBuilder {
    id: Option<String>,
    chat: Option<Arc<dyn ChatApiClient>>,
    memory: Option<Arc<MemoryEngine>>,
    tools: Option<Arc<ToolCallCoordinator>>,
    registry: Option<Arc<ToolRegistry>>,
    policy: ToolPolicy,
    events: Option<Arc<EventRouter>>,
    store: Option<Arc<dyn ConversationStore>>,
    config: AgentConfig,
    parameters: Parameters,
    conversation_id: Option<String>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            chat: None,
            memory: None,
            tools: None,
            registry: None,
            policy: ToolPolicy::default(),
            events: None,
            store: None,
            config: AgentConfig::default(),
            parameters: Parameters::default(),
            conversation_id: None,
        }
    }

    /// Take limits, default parameters, and tool policy from a config file
    pub fn from_config(config: OrchestratorConfig) -> Self {
        Self::new()
            .config(config.agent)
            .parameters(config.parameters)
            .tool_policy(config.tool_policy)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn chat_client(mut self, client: Arc<dyn ChatApiClient>) -> Self {
        self.chat = Some(client);
        self
    }

    pub fn memory(mut self, memory: Arc<MemoryEngine>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Use a ready-made coordinator; `tool_registry` and `tool_policy` are
    /// then ignored
    pub fn tools(mut self, tools: Arc<ToolCallCoordinator>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn tool_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn tool_policy(mut self, policy: ToolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn events(mut self, events: Arc<EventRouter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn max_tool_rounds(mut self, max: usize) -> Self {
        self.config.max_tool_rounds = max;
        self
    }

    pub fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.config.approval_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Resume this conversation if the store has it, else create it
    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn build(self) -> std::result::Result<Agent, ConfigError> {
        let chat = self
            .chat
            .ok_or_else(|| ConfigError::Invalid("chat client is required".to_string()))?;
        if self.config.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid(
                "maxToolRounds must be at least 1".to_string(),
            ));
        }

        let id = self.id.unwrap_or_else(|| new_id("agent"));
        let events = self.events.unwrap_or_else(|| Arc::new(EventRouter::new()));
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(MemoryEngine::recency_only().with_events(events.clone())));
        let tools = self.tools.unwrap_or_else(|| {
            Arc::new(ToolCallCoordinator::new(
                self.registry.unwrap_or_default(),
                self.policy,
                Arc::new(ApprovalChannel::new(events.clone())),
                events.clone(),
                Duration::from_millis(self.config.approval_timeout_ms),
            ))
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryConversationStore::new()));

        let resume = self.conversation_id.is_some();
        let conversation = match self.conversation_id {
            Some(conversation_id) => Conversation::with_id(conversation_id, id.clone()),
            None => Conversation::new(id.clone()),
        };
        let (status, _) = watch::channel(AgentStatus::Uninitialized);

        Ok(Agent {
            id,
            chat,
            memory,
            tools,
            events,
            store,
            config: self.config,
            parameters: Mutex::new(self.parameters),
            conversation: RwLock::new(conversation),
            resume,
            status,
            active_turn: Mutex::new(None),
            needs_full_save: AtomicBool::new(false),
            unindexed: Mutex::new(Vec::new()),
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
