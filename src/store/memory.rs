//! In-process record store for unit and integration tests
//!
//! This module provides [`MemoryStore`], an in-memory [`ChatStore`] that
//! replaces the SQLite backend in tests (and in embedders that do not want
//! durable state). It implements the full trait, including insert
//! notifications, so the push reconciler can be exercised without a real
//! database.
//!
//! # Usage
//!
//! Construct with [`MemoryStore::new`], wire it into the code under test,
//! and drive inserts either through the code under test or directly from
//! the test side to simulate another writer racing on the same chat:
//!
//! ```
//! use parlance::store::{ChatStore, MemoryStore, NewMessage};
//! use parlance::transcript::Role;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = MemoryStore::new();
//! let chat = store.insert_chat("New Chat").await.unwrap();
//!
//! let mut sub = store.subscribe(&chat.id);
//!
//! // Another writer persists an assistant message.
//! store.insert_message(NewMessage {
//!     chat_id: chat.id.clone(),
//!     role: Role::Assistant,
//!     content: "from elsewhere".to_string(),
//! }).await.unwrap();
//!
//! let notified = sub.recv().await.unwrap();
//! assert_eq!(notified.content, "from elsewhere");
//! # }
//! ```

use crate::error::{ParlanceError, Result};
use crate::store::{ChatRecord, ChatStore, InsertNotifier, MessageRecord, MessageSubscription, NewMessage};

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    chats: Vec<ChatRecord>,
    messages: Vec<MessageRecord>,
}

/// In-memory [`ChatStore`] implementation.
///
/// State lives behind a `Mutex`; insertion order of the backing vectors is
/// the tie-break order the trait contract requires.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    notifier: InsertNotifier,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notifier: InsertNotifier::new(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| ParlanceError::Storage("memory store lock poisoned".to_string()).into())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_chat(&self, title: &str) -> Result<ChatRecord> {
        let now = Utc::now();
        let record = ChatRecord {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.lock()?.chats.push(record.clone());
        Ok(record)
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        let state = self.lock()?;
        let mut chats = state.chats.clone();
        // Most recently updated first; stable sort keeps insertion order on
        // equal timestamps.
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn update_chat(&self, id: &str, title: &str) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(chat) = state.chats.iter_mut().find(|c| c.id == id) {
            chat.title = title.to_string();
            chat.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.chats.retain(|c| c.id != id);
        state.messages.retain(|m| m.chat_id != id);
        Ok(())
    }

    async fn insert_message(&self, new: NewMessage) -> Result<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            chat_id: new.chat_id,
            role: new.role,
            content: new.content,
            created_at: Utc::now(),
        };
        self.lock()?.messages.push(record.clone());
        self.notifier.notify(&record);
        Ok(record)
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let state = self.lock()?;
        let mut messages: Vec<MessageRecord> = state
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        // Stable sort: insertion order breaks created_at ties.
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    fn subscribe(&self, chat_id: &str) -> MessageSubscription {
        self.notifier.subscribe(chat_id)
    }
}
