//! Parlance - streaming chat transcript synchronization engine
//!
//! This library keeps a conversational transcript consistent while an
//! assistant reply streams in: it persists the outbound user message, opens
//! a chunked server-sent reply stream, assembles the reply incrementally
//! behind a live placeholder, finalizes the completed reply into the record
//! store, and reconciles everything against an independent push-notification
//! channel that may deliver the same message asynchronously.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: the chat session and stream orchestrator
//! - `transcript`: the ordered message list and its dedup rules
//! - `stream`: line framing and event decoding for the reply protocol
//! - `reconciler`: the push-notification merge task
//! - `reply`: the reply-service seam and HTTP client
//! - `store`: the record-store seam with SQLite and in-memory backends
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use parlance::{ChatSession, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     config.validate()?;
//!
//!     let session = ChatSession::from_config(&config)?;
//!     session.load_chats().await?;
//!     if session.active_chat_id().is_none() {
//!         session.create_chat().await?;
//!     }
//!
//!     session.send_message("Hello there, how are you doing today?").await?;
//!     for message in session.transcript() {
//!         println!("{}: {}", message.role, message.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod reconciler;
pub mod reply;
pub mod session;
pub mod store;
pub mod stream;
pub mod transcript;

// Re-export commonly used types
pub use config::Config;
pub use error::{ParlanceError, Result};
pub use session::ChatSession;
pub use store::{ChatStore, MemoryStore, SqliteStore};
pub use transcript::{Message, MessageId, Role, Transcript};
