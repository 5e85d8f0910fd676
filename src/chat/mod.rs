//! Chat provider abstraction
//!
//! The core never sees provider wire formats. A [`ChatApiClient`] turns an
//! assembled context into a normalized stream of [`ChatEvent`]s; adapters
//! for concrete providers live outside this crate.

pub mod mock;

pub use mock::{MockChatClient, MockResponse};

use crate::config::Parameters;
use crate::error::ProviderError;
use crate::types::{ConversationItem, TokenUsage, ToolCallRequest};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One element of a provider response stream
///
/// A well-formed stream ends with exactly one `Done` or `Error`. A stream
/// that closes without either is a protocol error.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Incremental assistant text
    TextDelta(String),
    /// The model asks for a function call
    ToolCallRequest(ToolCallRequest),
    /// Response complete
    Done { usage: TokenUsage },
    /// Response aborted by the provider mid-stream
    Error(ProviderError),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Done { .. } | ChatEvent::Error(_))
    }
}

/// Chat completion provider
#[async_trait]
pub trait ChatApiClient: Send + Sync {
    /// Start a completion over `context`
    ///
    /// An `Err` here means the request was never accepted (nothing streamed).
    /// Dropping the receiver aborts the request.
    async fn send(
        &self,
        context: &[ConversationItem],
        params: &Parameters,
    ) -> Result<mpsc::Receiver<ChatEvent>, ProviderError>;
}
