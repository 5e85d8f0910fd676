//! Re-ranking of long-term memory candidates
//!
//! `score = w_sim·similarity + w_rec·recency + w_thread·same_thread`
//!
//! `recency` halves every `half_life`, so it stays in (0, 1] and decreases
//! monotonically with age.

use super::index::{RecordPayload, ScoredRecord};
use crate::config::RerankWeights;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One long-term candidate after scoring; lives for a single assembly pass
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub record: RecordPayload,
    pub similarity: f32,
    pub recency: f32,
    pub same_thread: bool,
    /// Composite rank score
    pub score: f32,
}

/// Exponential decay of `age`; ages in the future count as zero
pub fn recency_score(age: chrono::Duration, half_life: Duration) -> f32 {
    let age_secs = age.num_milliseconds().max(0) as f64 / 1000.0;
    let half_life_secs = half_life.as_secs_f64();
    if half_life_secs <= 0.0 {
        return if age_secs == 0.0 { 1.0 } else { 0.0 };
    }
    (-std::f64::consts::LN_2 * age_secs / half_life_secs).exp() as f32
}

/// Score candidates and sort best first; ties go to the more recent record
pub fn rerank(
    candidates: Vec<ScoredRecord>,
    thread_id: &str,
    now: DateTime<Utc>,
    weights: &RerankWeights,
    half_life: Duration,
) -> Vec<RetrievalResult> {
    let mut results: Vec<RetrievalResult> = candidates
        .into_iter()
        .map(|candidate| {
            let recency = recency_score(now - candidate.payload.created_at, half_life);
            let same_thread = candidate.payload.thread_id == thread_id;
            let score = weights.similarity * candidate.similarity
                + weights.recency * recency
                + weights.same_thread * if same_thread { 1.0 } else { 0.0 };
            RetrievalResult {
                record: candidate.payload,
                similarity: candidate.similarity,
                recency,
                same_thread,
                score,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
            .then_with(|| a.record.item_id.cmp(&b.record.item_id))
    });
    results
}
