//! Hybrid conversation memory
//!
//! Context for a turn is assembled from four parts, in this order:
//!
//! 1. the conversation summary (optional, as a system item)
//! 2. the recency window: the last `max_context_messages` items
//! 3. long-term hits from the vector index, re-ranked and deduplicated
//!    against the window
//! 4. the new user input, always last
//!
//! Retrieval failures never fail a turn; assembly falls back to the recency
//! window and reports the degradation. Indexing runs after a turn commits
//! and may lag behind the next turn.

pub mod context;
pub mod index;
pub mod rerank;

pub use context::{estimate_tokens, ItemFingerprint};
pub use index::{InMemoryVectorStore, MemoryRecord, RecordPayload, ScoredRecord, VectorStore};
pub use rerank::{recency_score, RetrievalResult};

use crate::config::MemorySettings;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, MemoryError};
use crate::event::{EventRouter, MemoryEvent};
use crate::types::{Conversation, ConversationItem, ItemKind, Role};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Output of one assembly pass
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    /// Final ordered sequence sent to the provider
    pub items: Vec<ConversationItem>,
    /// Long-term results that made it into `items`, in rank order
    pub retrieved: Vec<RetrievalResult>,
    /// Recency-window items dropped to fit the token budget
    pub trimmed: usize,
    /// Set when retrieval was attempted and failed
    pub degraded: Option<MemoryError>,
}

/// Recency window + vector retrieval + indexing
pub struct MemoryEngine {
    index: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    events: Option<Arc<EventRouter>>,
}

impl MemoryEngine {
    pub fn new(index: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index,
            embedder: Some(embedder),
            events: None,
        }
    }

    /// Engine without long-term memory: assembly is recency-window only
    pub fn recency_only() -> Self {
        Self {
            index: Arc::new(InMemoryVectorStore::new(0)),
            embedder: None,
            events: None,
        }
    }

    /// Publish `MemoryEvent`s through this router
    pub fn with_events(mut self, events: Arc<EventRouter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorStore> {
        &self.index
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Build the context for a turn
    ///
    /// Reads only; the conversation is not modified. Calling twice on the
    /// same state yields the same result.
    pub async fn assemble_context(
        &self,
        conversation: &Conversation,
        new_input: &ConversationItem,
        settings: &MemorySettings,
    ) -> AssembledContext {
        let span = tracing::info_span!(
            "a3s.memory.assemble",
            a3s.conversation.id = %conversation.id,
            a3s.memory.window = tracing::field::Empty,
            a3s.memory.retrieved = tracing::field::Empty,
            a3s.memory.degraded = tracing::field::Empty,
        );

        async move {
            let window = conversation.last_n(settings.max_context_messages);

            let (candidates, degraded) = if settings.retrieval_enabled() && self.has_embedder() {
                // Ages are measured from the input's timestamp so repeated
                // assembly of the same state scores identically
                match self
                    .retrieve_at(&conversation.id, &new_input.content, settings, new_input.created_at)
                    .await
                {
                    Ok(results) => (results, None),
                    Err(e) => {
                        tracing::warn!(
                            conversation_id = %conversation.id,
                            error = %e,
                            "Retrieval failed, using recency window only"
                        );
                        self.publish(MemoryEvent::RetrievalDegraded {
                            conversation_id: conversation.id.clone(),
                            error: e.to_string(),
                        });
                        (Vec::new(), Some(e))
                    }
                }
            } else {
                (Vec::new(), None)
            };

            // Repeated hits, and hits that are the input itself
            let mut seen: HashSet<ItemFingerprint> = HashSet::new();
            seen.insert(ItemFingerprint::of_item(new_input));
            let hits: Vec<RetrievalResult> = candidates
                .into_iter()
                .filter(|r| seen.insert(ItemFingerprint::of_record(&r.record)))
                .collect();

            let summary = settings
                .include_summary
                .then(|| summary_item(conversation))
                .flatten();

            // Hits already in the window do not count against the budget
            let in_window: HashSet<ItemFingerprint> =
                window.iter().map(ItemFingerprint::of_item).collect();
            let trimmed = match settings.max_context_tokens {
                Some(budget) => {
                    let external = hits
                        .iter()
                        .filter(|r| !in_window.contains(&ItemFingerprint::of_record(&r.record)))
                        .map(|r| context::estimate_tokens(&r.record.content))
                        .sum::<usize>();
                    let fixed = summary.iter().map(context::item_tokens).sum::<usize>()
                        + external
                        + context::item_tokens(new_input);
                    context::oldest_overflow(window, budget.saturating_sub(fixed))
                }
                None => 0,
            };
            let window = &window[trimmed..];

            // Dedup against what is left of the window; a hit whose window
            // copy was trimmed stays in the long-term set
            let kept: HashSet<ItemFingerprint> =
                window.iter().map(ItemFingerprint::of_item).collect();
            let retrieved: Vec<RetrievalResult> = hits
                .into_iter()
                .filter(|r| !kept.contains(&ItemFingerprint::of_record(&r.record)))
                .collect();
            let retrieved_items: Vec<ConversationItem> = retrieved
                .iter()
                .map(|r| context::item_from_record(&r.record))
                .collect();
            if trimmed > 0 {
                tracing::debug!(trimmed, "Trimmed recency window to fit token budget");
            }

            let mut items =
                Vec::with_capacity(window.len() + retrieved_items.len() + 2);
            items.extend(summary);
            items.extend(window.iter().cloned());
            items.extend(retrieved_items);
            items.push(new_input.clone());

            let span = tracing::Span::current();
            span.record("a3s.memory.window", window.len());
            span.record("a3s.memory.retrieved", retrieved.len());
            span.record("a3s.memory.degraded", degraded.is_some());

            AssembledContext {
                items,
                retrieved,
                trimmed,
                degraded,
            }
        }
        .instrument(span)
        .await
    }

    /// Embed `query`, search the index, and re-rank the hits
    pub async fn retrieve(
        &self,
        thread_id: &str,
        query: &str,
        settings: &MemorySettings,
    ) -> Result<Vec<RetrievalResult>, MemoryError> {
        self.retrieve_at(thread_id, query, settings, Utc::now()).await
    }

    /// [`retrieve`](Self::retrieve) with recency measured at `now`
    pub async fn retrieve_at(
        &self,
        thread_id: &str,
        query: &str,
        settings: &MemorySettings,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetrievalResult>, MemoryError> {
        let embedder = self.embedder.as_ref().ok_or(MemoryError::NoEmbedder)?;
        let vector = embedder.embed(query).await?;
        check_dimension(embedder.as_ref(), &vector)?;

        let hits = self
            .index
            .search(
                &vector,
                settings.retrieval_top_k,
                settings.retrieval_min_similarity,
            )
            .await?;

        Ok(rerank::rerank(
            hits,
            thread_id,
            now,
            &settings.rerank_weights,
            Duration::from_secs(settings.recency_half_life_secs),
        ))
    }

    /// Embed and index the plain user/assistant messages among `items`
    ///
    /// Returns the number of records written.
    pub async fn index_items(
        &self,
        thread_id: &str,
        items: &[ConversationItem],
    ) -> Result<usize, MemoryError> {
        let indexable: Vec<&ConversationItem> = items.iter().filter(|i| is_indexable(i)).collect();
        if indexable.is_empty() {
            return Ok(0);
        }
        let embedder = self.embedder.as_ref().ok_or(MemoryError::NoEmbedder)?;

        let texts: Vec<String> = indexable.iter().map(|i| i.content.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        let mut records = Vec::with_capacity(indexable.len());
        for (item, vector) in indexable.into_iter().zip(vectors) {
            check_dimension(embedder.as_ref(), &vector)?;
            records.push(MemoryRecord {
                id: item.id.clone(),
                vector,
                payload: RecordPayload {
                    item_id: item.id.clone(),
                    role: item.role,
                    created_at: item.created_at,
                    thread_id: thread_id.to_string(),
                    content: item.content.clone(),
                },
            });
        }

        let count = records.len();
        self.index.upsert(records).await?;
        Ok(count)
    }

    /// Index in the background; failures are logged and published, never
    /// returned
    pub fn spawn_indexing(
        self: &Arc<Self>,
        thread_id: String,
        items: Vec<ConversationItem>,
    ) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.index_items(&thread_id, &items).await {
                Ok(0) => {}
                Ok(records) => {
                    tracing::debug!(conversation_id = %thread_id, records, "Indexed turn items");
                    engine.publish(MemoryEvent::Indexed {
                        conversation_id: thread_id,
                        records,
                    });
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %thread_id, error = %e, "Memory indexing failed");
                    engine.publish(MemoryEvent::IndexFailed {
                        conversation_id: thread_id,
                        error: e.to_string(),
                    });
                }
            }
        })
    }

    /// Remove all records of a conversation
    pub async fn delete_thread(&self, thread_id: &str) -> Result<usize, MemoryError> {
        self.index.delete_thread(thread_id).await
    }

    fn publish(&self, event: MemoryEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

fn is_indexable(item: &ConversationItem) -> bool {
    matches!(item.kind, ItemKind::Message)
        && matches!(item.role, Role::User | Role::Assistant)
        && !item.content.trim().is_empty()
}

fn check_dimension(embedder: &dyn EmbeddingProvider, vector: &[f32]) -> Result<(), MemoryError> {
    if vector.len() != embedder.dimension() {
        return Err(EmbeddingError::Dimension {
            expected: embedder.dimension(),
            actual: vector.len(),
        }
        .into());
    }
    Ok(())
}

/// Deterministic system item carrying the summary, so repeated assembly
/// produces identical output
fn summary_item(conversation: &Conversation) -> Option<ConversationItem> {
    let summary = conversation.summary()?;
    if summary.trim().is_empty() {
        return None;
    }
    Some(ConversationItem {
        id: format!("{}-summary", conversation.id),
        role: Role::System,
        content: format!("Summary of the conversation so far:\n{}", summary),
        kind: ItemKind::Message,
        created_at: conversation.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::error::EmbeddingError;
    use tokio_stream::StreamExt;

    fn engine() -> (Arc<MockEmbedder>, Arc<InMemoryVectorStore>, MemoryEngine) {
        let embedder = Arc::new(MockEmbedder::new(256));
        let index = Arc::new(InMemoryVectorStore::new(256));
        let engine = MemoryEngine::new(index.clone(), embedder.clone());
        (embedder, index, engine)
    }

    fn contents(items: &[ConversationItem]) -> Vec<&str> {
        items.iter().map(|i| i.content.as_str()).collect()
    }

    fn conversation(messages: &[&str]) -> Conversation {
        let mut conv = Conversation::with_id("conv-1", "agent-1");
        let base = Utc::now() - chrono::Duration::minutes(10);
        conv.append(messages.iter().enumerate().map(|(i, m)| {
            let item = if i % 2 == 0 {
                ConversationItem::user(*m)
            } else {
                ConversationItem::assistant(*m)
            };
            item.with_created_at(base + chrono::Duration::seconds(i as i64))
        }));
        conv
    }

    #[tokio::test]
    async fn test_recency_window_slice() {
        let engine = MemoryEngine::recency_only();
        let conv = conversation(&["U1", "A1", "U2", "A2"]);
        let input = ConversationItem::user("U3");

        let ctx = engine
            .assemble_context(&conv, &input, &MemorySettings::recency_only(3))
            .await;
        assert_eq!(contents(&ctx.items), vec!["A1", "U2", "A2", "U3"]);

        let ctx = engine
            .assemble_context(&conv, &input, &MemorySettings::recency_only(2))
            .await;
        assert_eq!(contents(&ctx.items), vec!["U2", "A2", "U3"]);
        assert_eq!(conv.len(), 4);
    }

    #[tokio::test]
    async fn test_summary_first_input_last() {
        let engine = MemoryEngine::recency_only();
        let mut conv = conversation(&["U1", "A1"]);
        conv.set_summary(Some("user likes dogs".into()));
        let input = ConversationItem::user("U2");

        let ctx = engine
            .assemble_context(&conv, &input, &MemorySettings::recency_only(10))
            .await;
        assert_eq!(ctx.items[0].role, Role::System);
        assert!(ctx.items[0].content.contains("user likes dogs"));
        assert_eq!(ctx.items.last().unwrap().content, "U2");

        let mut settings = MemorySettings::recency_only(10);
        settings.include_summary = false;
        let ctx = engine.assemble_context(&conv, &input, &settings).await;
        assert_eq!(contents(&ctx.items), vec!["U1", "A1", "U2"]);
    }

    #[tokio::test]
    async fn test_retrieval_adds_distant_items_after_window() {
        let (_embedder, _index, engine) = engine();
        let conv = conversation(&[
            "my dog is called Rex",
            "nice name",
            "tell me about taxes",
            "taxes are complicated",
        ]);
        engine.index_items(&conv.id, conv.items()).await.unwrap();

        let settings = MemorySettings {
            max_context_messages: 2,
            retrieval_min_similarity: 0.5,
            ..Default::default()
        };
        let input = ConversationItem::user("what is my dog called");
        let ctx = engine.assemble_context(&conv, &input, &settings).await;

        assert_eq!(
            contents(&ctx.items),
            vec![
                "tell me about taxes",
                "taxes are complicated",
                "my dog is called Rex",
                "what is my dog called"
            ]
        );
        assert!(ctx.degraded.is_none());
        assert!(ctx.retrieved[0].same_thread);
    }

    #[tokio::test]
    async fn test_dedup_against_window() {
        let (_embedder, _index, engine) = engine();
        let conv = conversation(&["my dog is called Rex", "nice name"]);
        engine.index_items(&conv.id, conv.items()).await.unwrap();

        let settings = MemorySettings {
            max_context_messages: 10,
            retrieval_min_similarity: 0.0,
            ..Default::default()
        };
        let input = ConversationItem::user("what is my dog called");
        let ctx = engine.assemble_context(&conv, &input, &settings).await;

        let rex = ctx
            .items
            .iter()
            .filter(|i| i.content == "my dog is called Rex")
            .count();
        assert_eq!(rex, 1);
        assert!(ctx.retrieved.is_empty());
    }

    #[tokio::test]
    async fn test_min_similarity_respected() {
        let (_embedder, _index, engine) = engine();
        let conv = conversation(&["alpha beta", "gamma delta", "alpha gamma", "omega"]);
        engine.index_items(&conv.id, conv.items()).await.unwrap();

        for threshold in [0.0f32, 0.3, 0.6, 0.9] {
            let settings = MemorySettings {
                max_context_messages: 0,
                retrieval_min_similarity: threshold,
                retrieval_top_k: 10,
                ..Default::default()
            };
            let ctx = engine
                .assemble_context(&conv, &ConversationItem::user("alpha"), &settings)
                .await;
            assert!(ctx.retrieved.iter().all(|r| r.similarity >= threshold));
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let (embedder, _index, engine) = engine();
        let events = Arc::new(EventRouter::new());
        let engine = engine.with_events(events.clone());
        let mut degraded = events.subscribe_stream::<MemoryEvent>();

        let conv = conversation(&["U1", "A1", "U2"]);
        embedder.set_available(false);
        let ctx = engine
            .assemble_context(&conv, &ConversationItem::user("U3"), &MemorySettings::default())
            .await;

        assert_eq!(contents(&ctx.items), vec!["U1", "A1", "U2", "U3"]);
        assert!(matches!(
            ctx.degraded,
            Some(MemoryError::Embedding(EmbeddingError::Unavailable(_)))
        ));
        assert!(matches!(
            degraded.next().await,
            Some(MemoryEvent::RetrievalDegraded { .. })
        ));
    }

    #[tokio::test]
    async fn test_index_unavailable_degrades() {
        let (_embedder, index, engine) = engine();
        index.set_available(false);
        let conv = conversation(&["U1"]);
        let ctx = engine
            .assemble_context(&conv, &ConversationItem::user("U2"), &MemorySettings::default())
            .await;
        assert_eq!(contents(&ctx.items), vec!["U1", "U2"]);
        assert!(matches!(ctx.degraded, Some(MemoryError::IndexUnavailable(_))));
    }

    #[tokio::test]
    async fn test_retrieval_skipped_when_disabled() {
        let (embedder, _index, engine) = engine();
        let conv = conversation(&["U1"]);
        let mut settings = MemorySettings::default();
        settings.retrieval_top_k = 0;

        engine
            .assemble_context(&conv, &ConversationItem::user("U2"), &settings)
            .await;
        assert_eq!(embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_assembly_is_idempotent() {
        let (_embedder, _index, engine) = engine();
        let mut conv = conversation(&["my dog is called Rex", "ok", "weather", "sunny"]);
        conv.set_summary(Some("dogs".into()));
        engine.index_items(&conv.id, conv.items()).await.unwrap();

        let settings = MemorySettings {
            max_context_messages: 2,
            ..Default::default()
        };
        let input = ConversationItem::user("dog name?");
        let first = engine.assemble_context(&conv, &input, &settings).await;
        let second = engine.assemble_context(&conv, &input, &settings).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_token_budget_trims_oldest_window_items() {
        let engine = MemoryEngine::recency_only();
        let conv = conversation(&["aaaaaaaa", "bbbbbbbb", "cccccccc", "dddddddd"]);
        let settings = MemorySettings {
            max_context_messages: 10,
            use_vector_store: false,
            max_context_tokens: Some(5),
            ..Default::default()
        };
        // input = 1 token, leaving 4 for the window (2 tokens per item)
        let ctx = engine
            .assemble_context(&conv, &ConversationItem::user("eeee"), &settings)
            .await;
        assert_eq!(contents(&ctx.items), vec!["cccccccc", "dddddddd", "eeee"]);
        assert_eq!(ctx.trimmed, 2);
    }

    #[tokio::test]
    async fn test_trimmed_window_item_survives_as_retrieved() {
        let (_embedder, _index, engine) = engine();
        let conv = conversation(&[
            "my dog is called Rex and he loves chasing the red ball",
            "nice",
            "ok",
        ]);
        engine.index_items(&conv.id, &conv.items()[..1]).await.unwrap();

        let settings = MemorySettings {
            max_context_messages: 10,
            max_context_tokens: Some(10),
            ..Default::default()
        };
        let input = ConversationItem::user("what is my dog called");
        let ctx = engine.assemble_context(&conv, &input, &settings).await;

        assert_eq!(ctx.trimmed, 1);
        assert_eq!(ctx.retrieved.len(), 1);
        assert_eq!(
            contents(&ctx.items),
            vec![
                "nice",
                "ok",
                "my dog is called Rex and he loves chasing the red ball",
                "what is my dog called"
            ]
        );
    }

    #[tokio::test]
    async fn test_index_items_filters_and_counts() {
        let (_embedder, index, engine) = engine();
        let request = crate::types::ToolCallRequest::new("c1", "echo", serde_json::json!({}));
        let items = vec![
            ConversationItem::user("hello there"),
            ConversationItem::assistant("   "),
            ConversationItem::system("be nice"),
            ConversationItem::tool_call(&request),
            ConversationItem::assistant("general kenobi"),
        ];
        assert_eq!(engine.index_items("conv-1", &items).await.unwrap(), 2);
        assert_eq!(index.len().await, 2);

        // Re-indexing the same items does not duplicate records
        engine.index_items("conv-1", &items).await.unwrap();
        assert_eq!(index.len().await, 2);

        assert_eq!(engine.delete_thread("conv-1").await.unwrap(), 2);
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn test_spawn_indexing_reports_failure() {
        let (embedder, _index, engine) = engine();
        let events = Arc::new(EventRouter::new());
        let engine = Arc::new(engine.with_events(events.clone()));
        let mut stream = events.subscribe_stream::<MemoryEvent>();

        embedder.set_available(false);
        engine
            .spawn_indexing("conv-1".into(), vec![ConversationItem::user("hi")])
            .await
            .unwrap();

        assert!(matches!(
            stream.next().await,
            Some(MemoryEvent::IndexFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_index_without_embedder() {
        let engine = MemoryEngine::recency_only();
        assert!(matches!(
            engine
                .index_items("c", &[ConversationItem::user("x")])
                .await,
            Err(MemoryError::NoEmbedder)
        ));
        assert_eq!(engine.index_items("c", &[]).await.unwrap(), 0);
    }
}
