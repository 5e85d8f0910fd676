//! # a3s-orchestrator
//!
//! Conversation orchestration core for A3S agents.
//!
//! ## Overview
//!
//! An [`Agent`] owns one conversation and drives it turn by turn: it
//! assembles context through the [`MemoryEngine`], streams a completion from
//! a [`ChatApiClient`], hands tool-call requests to the
//! [`ToolCallCoordinator`], and commits the turn to a [`ConversationStore`].
//! Everything observable along the way is published on the [`EventRouter`].
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_orchestrator::{Agent, MockChatClient, MockResponse, TextDelta};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> a3s_orchestrator::Result<()> {
//! let chat = Arc::new(MockChatClient::new(vec![MockResponse::text("Hello!")]));
//! let agent = Agent::builder()
//!     .chat_client(chat)
//!     .build()
//!     .expect("chat client is set");
//!
//! agent.events().subscribe(|delta: &TextDelta| -> anyhow::Result<()> {
//!     print!("{}", delta.text);
//!     Ok(())
//! });
//!
//! agent.initialize().await?;
//! let response = agent.send("Hi there").await?;
//! assert_eq!(response.text, "Hello!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Agent** — lifecycle state machine and the turn loop
//! - **MemoryEngine** — recency window + vector retrieval + summary
//! - **ToolCallCoordinator** — policy, approval, execution of tool calls
//! - **EventRouter** — typed, per-subscriber FIFO fan-out
//! - **ChatApiClient / EmbeddingProvider / ConversationStore** — the seams
//!   where providers and storage backends plug in

pub mod agent;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod event;
pub mod memory;
pub mod retry;
pub mod store;
pub mod tools;
pub mod types;

// Re-export core types
pub use agent::{Agent, AgentBuilder, AgentStatus, TurnResponse};
pub use chat::{ChatApiClient, ChatEvent, MockChatClient, MockResponse};
pub use config::{
    AgentConfig, MemorySettings, OrchestratorConfig, Parameters, RerankWeights, SamplingSettings,
};
pub use embedding::{cosine_similarity, EmbeddingProvider, MockEmbedder};
pub use error::{
    AgentError, ConfigError, EmbeddingError, ErrorCategory, MemoryError, ProviderError, Result,
    StoreError,
};
pub use event::{
    ApprovalRequested, ApprovalResolved, ErrorEvent, EventHandler, EventRouter, EventStream,
    MemoryEvent, RouterStats, StatusChanged, SubscriptionId, TextDelta, ToolEvent, TurnEvent,
};
pub use memory::{
    AssembledContext, InMemoryVectorStore, MemoryEngine, MemoryRecord, RetrievalResult,
    VectorStore,
};
pub use retry::RetryConfig;
pub use store::{ConversationStore, FileConversationStore, MemoryConversationStore};
pub use tools::{
    ApprovalChannel, ApprovalDecision, DenialReason, FailureReason, PolicyAction, ToolCall,
    ToolCallCoordinator, ToolCallState, ToolExecutor, ToolPolicy, ToolRegistry,
};
pub use types::{
    Conversation, ConversationItem, ItemKind, Role, TokenUsage, ToolCallRequest, ToolDefinition,
    ToolOutput,
};
