//! Conversation persistence
//!
//! Provides a pluggable storage backend for conversations:
//! - `ConversationStore` trait
//! - `MemoryConversationStore` for tests and ephemeral agents
//! - `FileConversationStore`, one pretty-printed JSON file per conversation
//!
//! The core only needs eventual durability: the agent retries a failed
//! incremental write with a full `save` on its next commit.

use crate::error::StoreError;
use crate::types::{Conversation, ConversationItem};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

type Result<T> = std::result::Result<T, StoreError>;

/// Conversation storage backend
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a new conversation; fails if the id is taken
    async fn create(&self, conversation: &Conversation) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<Conversation>>;

    /// Overwrite the stored conversation with this snapshot
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Remove a conversation; deleting a missing one is not an error
    async fn delete(&self, id: &str) -> Result<()>;

    /// Append items to a stored conversation
    ///
    /// Items whose id is already stored are skipped, so a retried write
    /// never duplicates.
    async fn save_items(&self, conversation_id: &str, items: &[ConversationItem]) -> Result<()>;

    /// Conversations owned by an agent, oldest first
    async fn list(&self, agent_id: &str) -> Result<Vec<Conversation>>;

    /// Backend name for diagnostics
    fn backend_name(&self) -> &str {
        "unknown"
    }
}

fn append_new(conversation: &mut Conversation, items: &[ConversationItem]) -> usize {
    let known: HashSet<&str> = conversation.items().iter().map(|i| i.id.as_str()).collect();
    let fresh: Vec<ConversationItem> = items
        .iter()
        .filter(|i| !known.contains(i.id.as_str()))
        .cloned()
        .collect();
    let count = fresh.len();
    conversation.append(fresh);
    count
}

fn sort_oldest_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create(&self, conversation: &Conversation) -> Result<()> {
        let mut map = self.conversations.write().await;
        if map.contains_key(&conversation.id) {
            return Err(StoreError::AlreadyExists(conversation.id.clone()));
        }
        map.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.conversations.write().await.remove(id);
        Ok(())
    }

    async fn save_items(&self, conversation_id: &str, items: &[ConversationItem]) -> Result<()> {
        let mut map = self.conversations.write().await;
        let conversation = map
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        append_new(conversation, items);
        Ok(())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<Conversation>> {
        let mut list: Vec<_> = self
            .conversations
            .read()
            .await
            .values()
            .filter(|c| c.agent_id == agent_id)
            .cloned()
            .collect();
        sort_oldest_first(&mut list);
        Ok(list)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// File-based store
// ============================================================================

/// Stores each conversation as `<dir>/<id>.json`
pub struct FileConversationStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl FileConversationStore {
    /// Create the store, creating `dir` if needed
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn conversation_path(&self, id: &str) -> PathBuf {
        // Sanitize ID to prevent path traversal
        let safe_id = id.replace(['/', '\\'], "_").replace("..", "_");
        self.dir.join(format!("{}.json", safe_id))
    }

    async fn read(&self, path: &Path) -> Result<Option<Conversation>> {
        match fs::read_to_string(path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Write atomically: temp file, fsync, then rename over the target
    async fn write(&self, conversation: &Conversation) -> Result<()> {
        let path = self.conversation_path(&conversation.id);
        let json = serde_json::to_string_pretty(conversation)?;
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.sync_all().await.map_err(|e| io_error(&temp_path, e))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        tracing::debug!("Saved conversation {} to {}", conversation.id, path.display());
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn create(&self, conversation: &Conversation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.conversation_path(&conversation.id);
        if fs::try_exists(&path).await.map_err(|e| io_error(&path, e))? {
            return Err(StoreError::AlreadyExists(conversation.id.clone()));
        }
        self.write(conversation).await
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let conversation = self.read(&self.conversation_path(id)).await?;
        if conversation.is_some() {
            tracing::debug!("Loaded conversation {}", id);
        }
        Ok(conversation)
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(conversation).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.conversation_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted conversation {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save_items(&self, conversation_id: &str, items: &[ConversationItem]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut conversation = self
            .read(&self.conversation_path(conversation_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        if append_new(&mut conversation, items) == 0 {
            return Ok(());
        }
        self.write(&conversation).await
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<Conversation>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let mut list = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(conversation)) if conversation.agent_id == agent_id => {
                    list.push(conversation)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Skipping unreadable conversation file {}: {}", path.display(), e)
                }
            }
        }
        sort_oldest_first(&mut list);
        Ok(list)
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}
