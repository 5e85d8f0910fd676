//! Core conversation types
//!
//! All types use camelCase JSON serialization so persisted conversations
//! stay readable by other A3S components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generate a prefixed unique identifier (e.g. `conv-<uuid>`)
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Speaker of a conversation item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// What a conversation item represents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    /// Plain text message
    Message,

    /// The model asked for a function call
    #[serde(rename_all = "camelCase")]
    ToolCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Result of a function call, reported back to the model
    #[serde(rename_all = "camelCase")]
    ToolOutput { call_id: String, is_error: bool },
}

/// A single entry in a conversation
///
/// Items are immutable once appended. Corrections are new items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationItem {
    /// Unique item identifier (item-<uuid>)
    pub id: String,
    pub role: Role,
    pub content: String,
    pub kind: ItemKind,
    pub created_at: DateTime<Utc>,
}

impl ConversationItem {
    fn message(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id("item"),
            role,
            content: content.into(),
            kind: ItemKind::Message,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::message(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::message(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::message(Role::System, content)
    }

    /// Assistant item recording a tool-call request
    pub fn tool_call(request: &ToolCallRequest) -> Self {
        Self {
            id: new_id("item"),
            role: Role::Assistant,
            content: String::new(),
            kind: ItemKind::ToolCall {
                call_id: request.id.clone(),
                name: request.name.clone(),
                arguments: request.arguments.clone(),
            },
            created_at: Utc::now(),
        }
    }

    /// Tool item carrying an executor result (or denial/failure text)
    pub fn tool_output(output: &ToolOutput) -> Self {
        Self {
            id: new_id("item"),
            role: Role::Tool,
            content: output.content.clone(),
            kind: ItemKind::ToolOutput {
                call_id: output.call_id.clone(),
                is_error: output.is_error,
            },
            created_at: Utc::now(),
        }
    }

    /// Override the creation timestamp (imports, fixtures)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_message(&self) -> bool {
        matches!(self.kind, ItemKind::Message)
    }
}

/// An ordered, append-only conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique conversation identifier (conv-<uuid>); also the memory thread id
    pub id: String,

    /// Agent that owns this conversation
    pub agent_id: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    items: Vec<ConversationItem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

impl Conversation {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self::with_id(new_id("conv"), agent_id)
    }

    pub fn with_id(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            created_at: now,
            updated_at: now,
            items: Vec::new(),
            summary: None,
        }
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Append items at the end; existing positions are never touched
    pub fn append(&mut self, items: impl IntoIterator<Item = ConversationItem>) {
        let before = self.items.len();
        self.items.extend(items);
        if self.items.len() != before {
            self.updated_at = Utc::now();
        }
    }

    pub fn set_summary(&mut self, summary: Option<String>) {
        self.summary = summary;
        self.updated_at = Utc::now();
    }

    /// The last `n` items in chronological order
    pub fn last_n(&self, n: usize) -> &[ConversationItem] {
        let start = self.items.len().saturating_sub(n);
        &self.items[start..]
    }
}

/// Function definition advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of one tool call, positionally matched to its request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_prefix() {
        let id = new_id("conv");
        assert!(id.starts_with("conv-"));
        assert_ne!(id, new_id("conv"));
    }

    #[test]
    fn test_conversation_append_only() {
        let mut conv = Conversation::new("agent-1");
        assert!(conv.is_empty());

        conv.append([ConversationItem::user("hi"), ConversationItem::assistant("hello")]);
        let first_id = conv.items()[0].id.clone();

        conv.append([ConversationItem::user("again")]);
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.items()[0].id, first_id);
        assert_eq!(conv.items()[2].content, "again");
    }

    #[test]
    fn test_last_n() {
        let mut conv = Conversation::new("agent-1");
        conv.append((0..5).map(|i| ConversationItem::user(format!("m{}", i))));

        let tail: Vec<_> = conv.last_n(2).iter().map(|i| i.content.as_str()).collect();
        assert_eq!(tail, vec!["m3", "m4"]);
        assert_eq!(conv.last_n(50).len(), 5);
        assert!(conv.last_n(0).is_empty());
    }

    #[test]
    fn test_tool_items() {
        let req = ToolCallRequest::new("call-1", "get_weather", serde_json::json!({"city": "Oslo"}));
        let item = ConversationItem::tool_call(&req);
        assert_eq!(item.role, Role::Assistant);
        assert!(!item.is_message());

        let output = ToolOutput {
            call_id: "call-1".into(),
            name: "get_weather".into(),
            content: "sunny".into(),
            is_error: false,
        };
        let item = ConversationItem::tool_output(&output);
        assert_eq!(item.role, Role::Tool);
        assert_eq!(item.content, "sunny");
        assert!(matches!(item.kind, ItemKind::ToolOutput { ref call_id, is_error: false } if call_id == "call-1"));
    }

    #[test]
    fn test_conversation_json_is_camel_case() {
        let mut conv = Conversation::with_id("conv-x", "agent-1");
        conv.set_summary(Some("short".into()));
        let json = serde_json::to_value(&conv).unwrap();
        assert_eq!(json["agentId"], "agent-1");
        assert_eq!(json["summary"], "short");

        let back: Conversation = serde_json::from_value(json).unwrap();
        assert_eq!(back, conv);
    }

    #[test]
    fn test_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.accumulate(&TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        assert_eq!(total.total_tokens, 17);
    }
}
