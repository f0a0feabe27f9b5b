//! Chat session and stream orchestration
//!
//! [`ChatSession`] owns the process-wide conversational state: the chat
//! list, the active chat id, the transcript for that chat, and the push
//! reconciler's subscription. Its [`send_message`](ChatSession::send_message)
//! drives one full send/stream/finalize cycle:
//!
//! 1. append the user's text optimistically and persist it;
//! 2. open the streamed reply and append an assistant placeholder;
//! 3. frame and decode each chunk, appending fragments live;
//! 4. persist the completed reply and promote the placeholder;
//! 5. derive the chat title and refresh the chat list.
//!
//! Every stream-driven transcript mutation is guarded by the originating
//! chat id: switching the active conversation mid-stream makes the
//! abandoned run's remaining mutations no-ops, while its store writes still
//! land in the old chat's history.

use crate::config::Config;
use crate::error::Result;
use crate::reconciler::PushReconciler;
use crate::reply::{HttpReplyClient, OutboundMessage, ReplyService, ReplyStream};
use crate::store::{ChatRecord, ChatStore, MessageRecord, NewMessage, SqliteStore};
use crate::stream::{decode_line, Decoded, LineFramer};
use crate::transcript::{Message, MessageId, Role, Transcript};

use anyhow::anyhow;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Title given to a chat before its first completed send.
const DEFAULT_CHAT_TITLE: &str = "New Chat";

/// Number of leading words kept when deriving a chat title.
const TITLE_WORD_LIMIT: usize = 5;

#[derive(Debug, Default)]
struct SessionState {
    active_chat: Option<String>,
    transcript: Transcript,
    chats: Vec<ChatRecord>,
}

type SharedState = Arc<Mutex<SessionState>>;

/// Run `f` against the transcript only while `chat_id` is still active.
///
/// This is the conversation-id guard: mutations originating from an
/// abandoned stream or a stale notification are discarded here.
fn with_active_transcript<R>(
    state: &SharedState,
    chat_id: &str,
    f: impl FnOnce(&mut Transcript) -> R,
) -> Option<R> {
    let mut state = match state.lock() {
        Ok(state) => state,
        Err(_) => {
            tracing::error!("session state lock poisoned");
            return None;
        }
    };
    if state.active_chat.as_deref() == Some(chat_id) {
        Some(f(&mut state.transcript))
    } else {
        tracing::debug!("discarding transcript mutation for inactive chat {}", chat_id);
        None
    }
}

/// Orchestrates sends, streaming, and reconciliation for one user session.
pub struct ChatSession {
    store: Arc<dyn ChatStore>,
    reply: Arc<dyn ReplyService>,
    state: SharedState,
    reconciler: Mutex<Option<PushReconciler>>,
    /// Chat ids with a send currently in flight (single-flight discipline).
    in_flight: Mutex<HashSet<String>>,
}

impl ChatSession {
    /// Create a session over explicit collaborators.
    pub fn new(store: Arc<dyn ChatStore>, reply: Arc<dyn ReplyService>) -> Self {
        Self {
            store,
            reply,
            state: Arc::new(Mutex::new(SessionState::default())),
            reconciler: Mutex::new(None),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Create a session wired to the SQLite store and HTTP reply client.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be initialized or the HTTP
    /// client cannot be constructed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn ChatStore> = match &config.store.db_path {
            Some(path) => Arc::new(SqliteStore::new_with_path(path)?),
            None => Arc::new(SqliteStore::new()?),
        };
        let reply: Arc<dyn ReplyService> = Arc::new(HttpReplyClient::new(&config.service)?);
        Ok(Self::new(store, reply))
    }

    // ------------------------------------------------------------------
    // Conversation management
    // ------------------------------------------------------------------

    /// Load the chat list from the store, most recently updated first.
    ///
    /// When no chat is active yet, the first chat is selected automatically.
    pub async fn load_chats(&self) -> Result<Vec<ChatRecord>> {
        let chats = self.store.list_chats().await?;

        let auto_select = {
            let mut state = self.lock_state()?;
            state.chats = chats.clone();
            if state.active_chat.is_none() {
                chats.first().map(|chat| chat.id.clone())
            } else {
                None
            }
        };

        if let Some(chat_id) = auto_select {
            self.select_chat(&chat_id).await?;
        }

        Ok(chats)
    }

    /// Make `chat_id` the active conversation.
    ///
    /// Clears the transcript, re-establishes the push subscription for the
    /// new chat, and loads its persisted messages in transcript order. Any
    /// still-running send for the previously active chat keeps writing to
    /// the store but can no longer touch the transcript.
    pub async fn select_chat(&self, chat_id: &str) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            state.active_chat = Some(chat_id.to_string());
            state.transcript.clear();
        }
        self.resubscribe(chat_id);

        let records = self.store.list_messages(chat_id).await?;
        let messages: Vec<Message> = records.into_iter().map(MessageRecord::into_message).collect();
        with_active_transcript(&self.state, chat_id, |transcript| transcript.load(messages));

        Ok(())
    }

    /// Create a new chat, make it active, and return its record.
    pub async fn create_chat(&self) -> Result<ChatRecord> {
        let chat = self.store.insert_chat(DEFAULT_CHAT_TITLE).await?;

        {
            let mut state = self.lock_state()?;
            state.chats.insert(0, chat.clone());
            state.active_chat = Some(chat.id.clone());
            state.transcript.clear();
        }
        self.resubscribe(&chat.id);

        Ok(chat)
    }

    /// Delete a chat; when it was active, fall back to the first remaining
    /// chat (or to no selection at all).
    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.store.delete_chat(chat_id).await?;

        let fallback = {
            let mut state = self.lock_state()?;
            state.chats.retain(|chat| chat.id != chat_id);
            if state.active_chat.as_deref() == Some(chat_id) {
                state.active_chat = None;
                state.transcript.clear();
                Some(state.chats.first().map(|chat| chat.id.clone()))
            } else {
                None
            }
        };

        match fallback {
            Some(Some(next)) => self.select_chat(&next).await?,
            Some(None) => self.clear_reconciler(),
            None => {}
        }

        Ok(())
    }

    /// Tear down subscriptions and in-memory state (sign-out).
    pub fn shutdown(&self) {
        self.clear_reconciler();
        if let Ok(mut state) = self.state.lock() {
            state.active_chat = None;
            state.transcript.clear();
            state.chats.clear();
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Id of the active conversation, if any.
    pub fn active_chat_id(&self) -> Option<String> {
        self.state.lock().ok().and_then(|state| state.active_chat.clone())
    }

    /// Snapshot of the cached chat list.
    pub fn chats(&self) -> Vec<ChatRecord> {
        self.state
            .lock()
            .map(|state| state.chats.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the active transcript in display order.
    pub fn transcript(&self) -> Vec<Message> {
        self.state
            .lock()
            .map(|state| state.transcript.messages().to_vec())
            .unwrap_or_default()
    }

    /// True while a send is in flight for the given chat.
    pub fn is_sending(&self, chat_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(chat_id))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Stream orchestration
    // ------------------------------------------------------------------

    /// Send a user message and stream the assistant reply into the
    /// transcript.
    ///
    /// Empty input, the absence of an active chat, and a send already in
    /// flight for this chat are all ignored at the boundary (not queued).
    /// Any failure is surfaced as a single error after cleanup: the user
    /// message stays in the transcript, an open placeholder is removed, and
    /// the in-flight flag is cleared so the send can be retried.
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let text = content.trim();
        if text.is_empty() {
            return Ok(());
        }

        let Some(chat_id) = self.active_chat_id() else {
            tracing::debug!("no active chat; message dropped");
            return Ok(());
        };

        if !self.begin_send(&chat_id) {
            tracing::warn!("send already in flight for chat {}; ignored", chat_id);
            return Ok(());
        }

        let result = self.run_send(&chat_id, text).await;
        self.end_send(&chat_id);

        if let Err(e) = &result {
            tracing::error!("send failed for chat {}: {}", chat_id, e);
        }
        result
    }

    async fn run_send(&self, chat_id: &str, text: &str) -> Result<()> {
        // Outbound context for the reply service: the conversation as it
        // stood, plus the new user message.
        let mut outbound: Vec<OutboundMessage> =
            with_active_transcript(&self.state, chat_id, |transcript| {
                transcript
                    .messages()
                    .iter()
                    .map(|m| OutboundMessage {
                        role: m.role,
                        content: m.content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let local_user =
            with_active_transcript(&self.state, chat_id, |transcript| transcript.append_user(text));

        let saved_user = self
            .store
            .insert_message(NewMessage {
                chat_id: chat_id.to_string(),
                role: Role::User,
                content: text.to_string(),
            })
            .await?;

        outbound.push(OutboundMessage {
            role: Role::User,
            content: saved_user.content.clone(),
        });
        if let Some(local_id) = &local_user {
            with_active_transcript(&self.state, chat_id, |transcript| {
                transcript.finalize(local_id, saved_user.into_message())
            });
        }

        let mut stream = self.reply.open_reply(&outbound, chat_id).await?;

        let placeholder =
            with_active_transcript(&self.state, chat_id, |transcript| transcript.begin_placeholder());

        let content = match self
            .drive_stream(&mut stream, chat_id, placeholder.as_ref())
            .await
        {
            Ok(content) => content,
            Err(e) => {
                self.discard_placeholder(chat_id, placeholder.as_ref());
                return Err(e);
            }
        };
        drop(stream);

        let saved_reply = match self
            .store
            .insert_message(NewMessage {
                chat_id: chat_id.to_string(),
                role: Role::Assistant,
                content: content.clone(),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.discard_placeholder(chat_id, placeholder.as_ref());
                return Err(e);
            }
        };

        if let Some(placeholder_id) = &placeholder {
            with_active_transcript(&self.state, chat_id, |transcript| {
                transcript.finalize(placeholder_id, saved_reply.into_message())
            });
        }

        self.store.update_chat(chat_id, &derive_title(text)).await?;
        self.load_chats().await?;

        Ok(())
    }

    /// Consume the reply stream, appending fragments to the placeholder.
    ///
    /// Returns the accumulated reply text. Stops consuming on the explicit
    /// terminator; the physical end of the stream also completes the reply.
    /// A residual partial line at stream end is not a decodable event and
    /// is discarded.
    async fn drive_stream(
        &self,
        stream: &mut ReplyStream,
        chat_id: &str,
        placeholder: Option<&MessageId>,
    ) -> Result<String> {
        let mut framer = LineFramer::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut content = String::new();
        let mut done = false;

        while !done {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk?;
            feed_bytes(&mut framer, &mut pending, &chunk);

            while let Some(line) = framer.next_line() {
                match decode_line(&line) {
                    Decoded::Fragment(fragment) => {
                        content.push_str(&fragment);
                        if let Some(placeholder_id) = placeholder {
                            with_active_transcript(&self.state, chat_id, |transcript| {
                                transcript.append_fragment(placeholder_id, &fragment)
                            });
                        }
                    }
                    Decoded::Done => {
                        done = true;
                        break;
                    }
                    Decoded::Skip => {}
                    Decoded::Incomplete => {
                        // Truncated payload: put the line back and wait for
                        // the next chunk to complete it.
                        framer.restore(&line);
                        break;
                    }
                }
            }
        }

        let residual = framer.take_residual();
        if !residual.is_empty() {
            tracing::debug!(
                "discarding {} bytes of undecodable trailing stream data",
                residual.len()
            );
        }

        Ok(content)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("session state lock poisoned"))
    }

    fn begin_send(&self, chat_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|mut set| set.insert(chat_id.to_string()))
            .unwrap_or(false)
    }

    fn end_send(&self, chat_id: &str) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(chat_id);
        }
    }

    fn discard_placeholder(&self, chat_id: &str, placeholder: Option<&MessageId>) {
        if let Some(placeholder_id) = placeholder {
            with_active_transcript(&self.state, chat_id, |transcript| {
                transcript.remove(placeholder_id)
            });
        }
    }

    /// Replace the push subscription with one scoped to `chat_id`.
    ///
    /// Dropping the previous reconciler aborts its task, so notifications
    /// for the old conversation stop before the new subscription starts.
    fn resubscribe(&self, chat_id: &str) {
        let subscription = self.store.subscribe(chat_id);
        let state = Arc::clone(&self.state);
        let guard_chat = chat_id.to_string();

        let reconciler = PushReconciler::spawn(subscription, move |record| {
            let message = record.into_message();
            with_active_transcript(&state, &guard_chat, |transcript| {
                transcript.merge_pushed(message);
            });
        });

        if let Ok(mut slot) = self.reconciler.lock() {
            *slot = Some(reconciler);
        }
    }

    fn clear_reconciler(&self) {
        if let Ok(mut slot) = self.reconciler.lock() {
            *slot = None;
        }
    }
}

/// Feed raw bytes into the framer, holding back a split multi-byte
/// character until its remaining bytes arrive. Invalid byte sequences are
/// skipped.
fn feed_bytes(framer: &mut LineFramer, pending: &mut Vec<u8>, chunk: &[u8]) {
    pending.extend_from_slice(chunk);
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                framer.feed(text);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                framer.feed(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        tracing::warn!("skipping {} invalid bytes in reply stream", bad);
                        pending.drain(..valid + bad);
                    }
                    None => {
                        // Incomplete character tail; keep it for the next
                        // chunk.
                        pending.drain(..valid);
                        return;
                    }
                }
            }
        }
    }
}

/// Derive a chat title from the user's text: the first
/// [`TITLE_WORD_LIMIT`] words, with `...` appended when shortened.
fn derive_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > TITLE_WORD_LIMIT {
        format!("{}...", words[..TITLE_WORD_LIMIT].join(" "))
    } else {
        words.join(" ")
    }
}
