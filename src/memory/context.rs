//! Context assembly helpers: fingerprints, token estimates, budget trimming

use super::index::RecordPayload;
use crate::types::{ConversationItem, ItemKind, Role};
use chrono::{DateTime, Utc};

/// Structural identity used to spot the same item reaching the context
/// through both the recency window and retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemFingerprint {
    role: Role,
    content_len: usize,
    created_at_ms: i64,
}

impl ItemFingerprint {
    fn new(role: Role, content: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            role,
            content_len: content.len(),
            created_at_ms: created_at.timestamp_millis(),
        }
    }

    pub fn of_item(item: &ConversationItem) -> Self {
        Self::new(item.role, &item.content, item.created_at)
    }

    pub fn of_record(payload: &RecordPayload) -> Self {
        Self::new(payload.role, &payload.content, payload.created_at)
    }
}

/// Rough token count: ~4 characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Token estimate of one item, including tool-call arguments
pub fn item_tokens(item: &ConversationItem) -> usize {
    let extra = match &item.kind {
        ItemKind::ToolCall { name, arguments, .. } => {
            estimate_tokens(name) + estimate_tokens(&arguments.to_string())
        }
        _ => 0,
    };
    estimate_tokens(&item.content) + extra
}

pub fn total_tokens<'a>(items: impl IntoIterator<Item = &'a ConversationItem>) -> usize {
    items.into_iter().map(item_tokens).sum()
}

/// Number of leading (oldest) items to drop so the rest fits in `budget`
///
/// The newest item is never dropped, even if it alone exceeds the budget.
pub fn oldest_overflow(window: &[ConversationItem], budget: usize) -> usize {
    let mut used = total_tokens(window);
    let mut drop = 0;
    while used > budget && drop + 1 < window.len() {
        used -= item_tokens(&window[drop]);
        drop += 1;
    }
    drop
}

/// Rebuild a conversation item from the record that indexed it
pub fn item_from_record(payload: &RecordPayload) -> ConversationItem {
    ConversationItem {
        id: payload.item_id.clone(),
        role: payload.role,
        content: payload.content.clone(),
        kind: ItemKind::Message,
        created_at: payload.created_at,
    }
}
