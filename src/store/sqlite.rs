use crate::error::{ParlanceError, Result};
use crate::store::{ChatRecord, ChatStore, InsertNotifier, MessageRecord, MessageSubscription, NewMessage};
use crate::transcript::Role;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use uuid::Uuid;

/// SQLite-backed record store
///
/// Keeps chats and messages in two tables and dispatches insert
/// notifications to [`MessageSubscription`]s over an in-process channel.
pub struct SqliteStore {
    db_path: PathBuf,
    notifier: InsertNotifier,
}

impl SqliteStore {
    /// Create a new store instance
    ///
    /// Initializes the database file in the user's data directory.
    pub fn new() -> Result<Self> {
        // Allow override of the DB path via environment variable. This makes
        // it easy to point at a test DB or alternate file without changing
        // the user's application data dir.
        if let Ok(override_path) = std::env::var("PARLANCE_STORE_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("dev", "parlance", "parlance")
            .ok_or_else(|| ParlanceError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        let db_path = data_dir.join("chats.db");
        let store = Self {
            db_path,
            notifier: InsertNotifier::new(),
        };

        store.init()?;

        Ok(store)
    }

    /// Create a new store instance that uses the specified database path.
    ///
    /// This is primarily useful for tests where the default application data
    /// directory is not desirable (for example, using a temporary directory).
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        // Ensure parent directory exists so opening the DB file succeeds.
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| ParlanceError::Storage(e.to_string()))?;
        }

        let store = Self {
            db_path,
            notifier: InsertNotifier::new(),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.open()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages (chat_id, created_at);",
        )
        .context("Failed to create tables")
        .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        Ok(())
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| ParlanceError::Storage(e.to_string()).into())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now()) // Fallback if parsing fails
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn insert_chat(&self, title: &str) -> Result<ChatRecord> {
        let conn = self.open()?;

        let now = Utc::now();
        let record = ChatRecord {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            "INSERT INTO chats (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![
                record.id,
                record.title,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339()
            ],
        )
        .context("Failed to insert chat")
        .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        Ok(record)
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        let conn = self.open()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at, updated_at FROM chats
                ORDER BY updated_at DESC",
            )
            .context("Failed to prepare statement")
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        let chats_iter = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let title: String = row.get(1)?;
                let created_at_str: String = row.get(2)?;
                let updated_at_str: String = row.get(3)?;

                Ok(ChatRecord {
                    id,
                    title,
                    created_at: parse_timestamp(&created_at_str),
                    updated_at: parse_timestamp(&updated_at_str),
                })
            })
            .context("Failed to query chats")
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        let mut chats = Vec::new();
        for chat in chats_iter.flatten() {
            chats.push(chat);
        }

        Ok(chats)
    }

    async fn update_chat(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.open()?;

        conn.execute(
            "UPDATE chats SET title = ?, updated_at = ? WHERE id = ?",
            params![title, Utc::now().to_rfc3339(), id],
        )
        .context("Failed to update chat")
        .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> Result<()> {
        let conn = self.open()?;

        conn.execute("DELETE FROM messages WHERE chat_id = ?", params![id])
            .context("Failed to delete chat messages")
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;
        conn.execute("DELETE FROM chats WHERE id = ?", params![id])
            .context("Failed to delete chat")
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn insert_message(&self, new: NewMessage) -> Result<MessageRecord> {
        let conn = self.open()?;

        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            chat_id: new.chat_id,
            role: new.role,
            content: new.content,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO messages (id, chat_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)",
            params![
                record.id,
                record.chat_id,
                record.role.to_string(),
                record.content,
                record.created_at.to_rfc3339()
            ],
        )
        .context("Failed to insert message")
        .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        self.notifier.notify(&record);

        Ok(record)
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.open()?;

        // rowid breaks created_at ties in insertion order.
        let mut stmt = conn
            .prepare(
                "SELECT id, chat_id, role, content, created_at FROM messages
                WHERE chat_id = ?
                ORDER BY created_at ASC, rowid ASC",
            )
            .context("Failed to prepare statement")
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        let messages_iter = stmt
            .query_map(params![chat_id], |row| {
                let id: String = row.get(0)?;
                let chat_id: String = row.get(1)?;
                let role_str: String = row.get(2)?;
                let content: String = row.get(3)?;
                let created_at_str: String = row.get(4)?;

                Ok((id, chat_id, role_str, content, created_at_str))
            })
            .context("Failed to query messages")
            .map_err(|e| ParlanceError::Storage(e.to_string()))?;

        let mut messages = Vec::new();
        for row in messages_iter.flatten() {
            let (id, chat_id, role_str, content, created_at_str) = row;
            let role: Role = role_str
                .parse()
                .map_err(|e: String| ParlanceError::Storage(e))?;
            messages.push(MessageRecord {
                id,
                chat_id,
                role,
                content,
                created_at: parse_timestamp(&created_at_str),
            });
        }

        Ok(messages)
    }

    fn subscribe(&self, chat_id: &str) -> MessageSubscription {
        self.notifier.subscribe(chat_id)
    }
}
