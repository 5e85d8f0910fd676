//! Scripted chat client for tests and local development

use super::{ChatApiClient, ChatEvent};
use crate::config::Parameters;
use crate::error::ProviderError;
use crate::types::{ConversationItem, TokenUsage, ToolCallRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Stream these events, then close the channel
    Events(Vec<ChatEvent>),
    /// Stream these events, then stay open until the receiver is dropped
    Stall(Vec<ChatEvent>),
    /// Reject the request up front
    Fail(ProviderError),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::text_chunks(&[text])
    }

    pub fn text_chunks(chunks: &[&str]) -> Self {
        let mut events: Vec<_> = chunks
            .iter()
            .map(|c| ChatEvent::TextDelta(c.to_string()))
            .collect();
        events.push(ChatEvent::Done {
            usage: default_usage(),
        });
        MockResponse::Events(events)
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        let mut events: Vec<_> = calls.into_iter().map(ChatEvent::ToolCallRequest).collect();
        events.push(ChatEvent::Done {
            usage: default_usage(),
        });
        MockResponse::Events(events)
    }

    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![ToolCallRequest::new(id, name, arguments)])
    }
}

fn default_usage() -> TokenUsage {
    TokenUsage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// Chat client that replays scripted responses in order
///
/// Every context it receives is recorded for inspection.
#[derive(Default)]
pub struct MockChatClient {
    responses: Mutex<VecDeque<MockResponse>>,
    contexts: Mutex<Vec<Vec<ConversationItem>>>,
    call_count: AtomicUsize,
    event_delay: Option<Duration>,
}

impl MockChatClient {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Pause between streamed events
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = Some(delay);
        self
    }

    pub fn push(&self, response: MockResponse) {
        lock(&self.responses).push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Contexts passed to `send`, oldest first
    pub fn contexts(&self) -> Vec<Vec<ConversationItem>> {
        lock(&self.contexts).clone()
    }

    pub fn last_context(&self) -> Option<Vec<ConversationItem>> {
        lock(&self.contexts).last().cloned()
    }
}

#[async_trait]
impl ChatApiClient for MockChatClient {
    async fn send(
        &self,
        context: &[ConversationItem],
        _params: &Parameters,
    ) -> Result<mpsc::Receiver<ChatEvent>, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.contexts).push(context.to_vec());

        let response = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| ProviderError::Other("no scripted response left".to_string()))?;

        let (events, stall) = match response {
            MockResponse::Fail(err) => return Err(err),
            MockResponse::Events(events) => (events, false),
            MockResponse::Stall(events) => (events, true),
        };

        let (tx, rx) = mpsc::channel(16);
        let delay = self.event_delay;
        tokio::spawn(async move {
            for event in events {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            if stall {
                tx.closed().await;
            }
        });

        Ok(rx)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_in_order() {
        let client = MockChatClient::new(vec![
            MockResponse::tool_call("c1", "echo", json!({})),
            MockResponse::text_chunks(&["Hel", "lo"]),
        ]);
        let params = Parameters::default();

        let mut rx = client.send(&[], &params).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ChatEvent::ToolCallRequest(ref c)) if c.id == "c1"));
        assert!(rx.recv().await.unwrap().is_terminal());
        assert!(rx.recv().await.is_none());

        let ctx = vec![ConversationItem::user("hi")];
        let mut rx = client.send(&ctx, &params).await.unwrap();
        assert_eq!(rx.recv().await, Some(ChatEvent::TextDelta("Hel".into())));
        assert_eq!(rx.recv().await, Some(ChatEvent::TextDelta("lo".into())));

        assert_eq!(client.call_count(), 2);
        assert_eq!(client.last_context().unwrap()[0].content, "hi");
    }

    #[tokio::test]
    async fn test_fail_and_exhausted() {
        let client = MockChatClient::new(vec![MockResponse::Fail(ProviderError::Authentication(
            "bad key".into(),
        ))]);
        let params = Parameters::default();

        assert!(matches!(
            client.send(&[], &params).await,
            Err(ProviderError::Authentication(_))
        ));
        assert!(matches!(
            client.send(&[], &params).await,
            Err(ProviderError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_stall_keeps_stream_open() {
        let client = MockChatClient::new(vec![MockResponse::Stall(vec![ChatEvent::TextDelta(
            "partial".into(),
        )])]);
        let mut rx = client.send(&[], &Parameters::default()).await.unwrap();
        assert_eq!(rx.recv().await, Some(ChatEvent::TextDelta("partial".into())));

        let next = tokio::time::timeout(Duration::from_millis(30), rx.recv()).await;
        assert!(next.is_err());
    }
}
