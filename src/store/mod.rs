//! Record store collaborator
//!
//! This module defines the [`ChatStore`] trait that all persistence
//! backends implement, along with the chat/message record types and the
//! insert-notification subscription used by the push reconciler.
//!
//! The engine itself has no on-disk state; everything durable is delegated
//! to a `ChatStore` implementation. Two are provided: a SQLite backend
//! ([`sqlite::SqliteStore`]) and an in-process backend
//! ([`memory::MemoryStore`]) for tests and embedding.

use crate::error::Result;
use crate::transcript::{Message, MessageId, Role};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Capacity of the insert-notification channel.
///
/// Lagging subscribers lose the oldest notifications; the reconciler treats
/// a lag as missed pushes, which the dedup rules make harmless.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Store-assigned identifier
    pub id: String,
    /// Display title; derived from the first words of a completed send
    pub title: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Touched on every completed send
    pub updated_at: DateTime<Utc>,
}

/// A persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Store-assigned identifier
    pub id: String,
    /// Owning chat
    pub chat_id: String,
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
    /// Creation timestamp; list order is this field ascending, ties broken
    /// by insertion order
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Convert into a transcript [`Message`] with a persisted identity.
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId::Persisted(self.id),
            role: self.role,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// Fields of a message to insert; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Owning chat
    pub chat_id: String,
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
}

/// Receiver half of a store's insert notifications, filtered to one chat.
///
/// Obtained from [`ChatStore::subscribe`]. Dropping the subscription is the
/// unsubscribe; the reconciler also aborts its consuming task when the
/// active conversation changes.
#[derive(Debug)]
pub struct MessageSubscription {
    chat_id: String,
    rx: broadcast::Receiver<MessageRecord>,
}

impl MessageSubscription {
    /// Build a subscription over a store's broadcast channel.
    pub(crate) fn new(chat_id: String, rx: broadcast::Receiver<MessageRecord>) -> Self {
        Self { chat_id, rx }
    }

    /// The chat this subscription is scoped to.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Receive the next insert notification for the subscribed chat.
    ///
    /// Inserts for other chats are filtered out. Returns `None` when the
    /// store side of the channel is gone. A lagged receiver skips the lost
    /// notifications and keeps going.
    pub async fn recv(&mut self) -> Option<MessageRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) if record.chat_id == self.chat_id => return Some(record),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("message subscription lagged; {} notifications lost", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Shared notification fan-out used by store implementations.
///
/// Wraps a `tokio::sync::broadcast` sender; every insert is published to all
/// live subscriptions regardless of chat, and [`MessageSubscription`] does
/// the per-chat filtering.
#[derive(Debug, Clone)]
pub(crate) struct InsertNotifier {
    tx: broadcast::Sender<MessageRecord>,
}

impl InsertNotifier {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self, chat_id: &str) -> MessageSubscription {
        MessageSubscription::new(chat_id.to_string(), self.tx.subscribe())
    }

    pub(crate) fn notify(&self, record: &MessageRecord) {
        // A send error only means no subscriber is listening right now.
        let _ = self.tx.send(record.clone());
    }
}

/// Persistence backend for chats and messages.
///
/// All methods take `&self`; implementations manage their own interior
/// state. Ordering contracts: [`list_chats`](Self::list_chats) returns
/// `updated_at` descending, [`list_messages`](Self::list_messages) returns
/// `created_at` ascending with insertion-order ties.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert a new chat with the given title.
    async fn insert_chat(&self, title: &str) -> Result<ChatRecord>;

    /// List all chats, most recently updated first.
    async fn list_chats(&self) -> Result<Vec<ChatRecord>>;

    /// Update a chat's title and touch its `updated_at` timestamp.
    async fn update_chat(&self, id: &str, title: &str) -> Result<()>;

    /// Delete a chat and its messages. Idempotent.
    async fn delete_chat(&self, id: &str) -> Result<()>;

    /// Insert a message, assigning id and timestamp, and notify
    /// subscribers.
    async fn insert_message(&self, new: NewMessage) -> Result<MessageRecord>;

    /// List a chat's messages in transcript order.
    async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>>;

    /// Subscribe to insert notifications scoped to one chat.
    fn subscribe(&self, chat_id: &str) -> MessageSubscription;
}
