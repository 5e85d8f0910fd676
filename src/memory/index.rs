//! Vector index for long-term memory

use crate::embedding::cosine_similarity;
use crate::error::{EmbeddingError, MemoryError};
use crate::types::Role;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// What a record points back to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    pub item_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    /// Conversation the item belongs to
    pub thread_id: String,
    pub content: String,
}

/// Embedding of one conversation item; never mutated after insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Same as the item id, so re-indexing an item replaces its record
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: RecordPayload,
}

/// A search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub payload: RecordPayload,
    pub similarity: f32,
}

/// Storage backend for memory records
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert records, replacing any with the same id
    async fn upsert(&self, records: Vec<MemoryRecord>) -> Result<(), MemoryError>;

    /// Up to `top_k` records with similarity ≥ `min_similarity`, best first
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<ScoredRecord>, MemoryError>;

    /// Remove every record of a conversation; returns how many were removed
    async fn delete_thread(&self, thread_id: &str) -> Result<usize, MemoryError>;

    async fn len(&self) -> usize;
}

/// Brute-force cosine index held in memory
pub struct InMemoryVectorStore {
    dimension: usize,
    records: RwLock<HashMap<String, MemoryRecord>>,
    available: AtomicBool,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Simulate an outage: searches and writes fail while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), MemoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MemoryError::IndexUnavailable("index offline".to_string()))
        }
    }

    fn check_dimension(&self, len: usize) -> Result<(), MemoryError> {
        if len != self.dimension {
            return Err(MemoryError::Embedding(EmbeddingError::Dimension {
                expected: self.dimension,
                actual: len,
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<MemoryRecord>) -> Result<(), MemoryError> {
        self.check_available()?;
        for record in &records {
            self.check_dimension(record.vector.len())?;
        }
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        self.check_available()?;
        self.check_dimension(query.len())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let map = self.records.read().await;
        let mut hits: Vec<ScoredRecord> = map
            .values()
            .map(|r| ScoredRecord {
                payload: r.payload.clone(),
                similarity: cosine_similarity(query, &r.vector),
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        // Stable order for equal scores: newest first, then id
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.payload.created_at.cmp(&a.payload.created_at))
                .then_with(|| a.payload.item_id.cmp(&b.payload.item_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<usize, MemoryError> {
        self.check_available()?;
        let mut map = self.records.write().await;
        let before = map.len();
        map.retain(|_, r| r.payload.thread_id != thread_id);
        Ok(before - map.len())
    }

    async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, thread: &str, vector: Vec<f32>) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            vector,
            payload: RecordPayload {
                item_id: id.to_string(),
                role: Role::User,
                created_at: Utc::now(),
                thread_id: thread.to_string(),
                content: format!("content {}", id),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let index = InMemoryVectorStore::new(3);
        index
            .upsert(vec![
                record("a", "t1", vec![1.0, 0.0, 0.0]),
                record("b", "t1", vec![0.0, 1.0, 0.0]),
                record("c", "t2", vec![0.9, 0.1, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 10, 0.0).await.unwrap();
        assert_eq!(hits[0].payload.item_id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 0.01);
        assert_eq!(hits[1].payload.item_id, "c");
    }

    #[tokio::test]
    async fn test_threshold_and_top_k() {
        let index = InMemoryVectorStore::new(3);
        index
            .upsert(vec![
                record("a", "t1", vec![1.0, 0.0, 0.0]),
                record("b", "t1", vec![0.0, 1.0, 0.0]),
                record("c", "t1", vec![0.7, 0.7, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.similarity >= 0.5));

        let hits = index.search(&[1.0, 0.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.search(&[1.0, 0.0, 0.0], 0, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let index = InMemoryVectorStore::new(2);
        index.upsert(vec![record("a", "t1", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(vec![record("a", "t1", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = InMemoryVectorStore::new(3);
        let err = index
            .upsert(vec![record("a", "t1", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Embedding(EmbeddingError::Dimension { expected: 3, actual: 1 })
        ));
        assert!(index.search(&[1.0, 0.0], 5, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let index = InMemoryVectorStore::new(2);
        index
            .upsert(vec![
                record("a", "t1", vec![1.0, 0.0]),
                record("b", "t1", vec![0.0, 1.0]),
                record("c", "t2", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(index.delete_thread("t1").await.unwrap(), 2);
        assert_eq!(index.delete_thread("t1").await.unwrap(), 0);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let index = InMemoryVectorStore::new(2);
        index.set_available(false);
        assert!(matches!(
            index.search(&[1.0, 0.0], 5, 0.0).await,
            Err(MemoryError::IndexUnavailable(_))
        ));
        index.set_available(true);
        assert!(index.search(&[1.0, 0.0], 5, 0.0).await.is_ok());
    }
}
