//! Error types for a3s-orchestrator
//!
//! Errors are split by the component that raises them. Only [`AgentError`]
//! crosses the public `send` boundary; the others are either converted into
//! it or contained (retrieval failures degrade, tool failures become tool
//! output).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a [`ChatApiClient`](crate::chat::ChatApiClient)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure, timeout, rate limit, or 5xx; retryable by policy
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Credentials rejected; never retried
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request rejected or response malformed
    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether a retry policy may retry this error
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Errors reported by an [`EmbeddingProvider`](crate::embedding::EmbeddingProvider)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Embedding backend unreachable or failed
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    /// Returned vector does not match the expected dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

/// Errors raised by the memory layer (vector index, retrieval, indexing)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// Query embedding could not be produced
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Vector index rejected the query or is offline
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// No embedding provider configured for an operation that needs one
    #[error("No embedding provider configured")]
    NoEmbedder,
}

/// Errors raised by a [`ConversationStore`](crate::store::ConversationStore)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Conversation does not exist
    #[error("Conversation not found: {0}")]
    NotFound(String),

    /// Conversation id already taken
    #[error("Conversation already exists: {0}")]
    AlreadyExists(String),

    /// Filesystem failure
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Configuration loading/saving failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File content is not a valid configuration
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Values parsed but are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Category attached to error events so event-driven consumers can branch
/// without matching on [`AgentError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    TransientProvider,
    Authentication,
    Provider,
    ToolLoopExceeded,
    Store,
    Protocol,
    Lifecycle,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TransientProvider => "transient_provider",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Provider => "provider",
            ErrorCategory::ToolLoopExceeded => "tool_loop_exceeded",
            ErrorCategory::Store => "store",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Lifecycle => "lifecycle",
        }
    }
}

/// Errors surfaced by the [`Agent`](crate::agent::Agent)
#[derive(Debug, Error)]
pub enum AgentError {
    /// `send` called while the agent is not `Ready`
    #[error("Agent is not ready (status: {0})")]
    NotReady(String),

    /// Agent has been disposed
    #[error("Agent has been stopped")]
    Stopped,

    /// Network/timeout failure from the provider
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Provider rejected credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Provider failed for a non-retryable, non-auth reason
    #[error("Provider error: {0}")]
    Provider(String),

    /// The model kept requesting tools past the configured round limit
    #[error("Tool loop exceeded: more than {max_rounds} tool rounds")]
    ToolLoopExceeded { max_rounds: usize },

    /// Provider stream ended without a terminal event
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Turn was canceled by the caller
    #[error("Turn canceled")]
    Canceled,

    /// Conversation store failure during initialization or deletion
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AgentError {
    /// Category used for the error event
    pub fn category(&self) -> ErrorCategory {
        match self {
            AgentError::TransientProvider(_) => ErrorCategory::TransientProvider,
            AgentError::Authentication(_) => ErrorCategory::Authentication,
            AgentError::Provider(_) => ErrorCategory::Provider,
            AgentError::ToolLoopExceeded { .. } => ErrorCategory::ToolLoopExceeded,
            AgentError::Protocol(_) => ErrorCategory::Protocol,
            AgentError::Store(_) => ErrorCategory::Store,
            AgentError::NotReady(_) | AgentError::Stopped | AgentError::Canceled => {
                ErrorCategory::Lifecycle
            }
        }
    }
}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(msg) => AgentError::TransientProvider(msg),
            ProviderError::Authentication(msg) => AgentError::Authentication(msg),
            ProviderError::Other(msg) => AgentError::Provider(msg),
        }
    }
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
