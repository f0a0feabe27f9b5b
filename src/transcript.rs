//! Transcript accumulation for the active conversation
//!
//! The [`Transcript`] owns the ordered in-memory message list for the
//! currently selected chat. It applies optimistic inserts, live content
//! updates to an in-flight placeholder, identity promotion when a
//! placeholder is replaced by its persisted counterpart, and deduplication
//! against the push-notification channel. No other component mutates the
//! list directly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation
    User,
    /// The streamed reply side
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Identity of a transcript entry.
///
/// `Persisted` carries a store-assigned id; `Local` is a process-unique
/// token minted for optimistic entries and streaming placeholders. The two
/// variants are structurally distinct, so a local token can never collide
/// with a persisted id, and a local token is never reused after retirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Store-assigned identifier of a durably persisted message
    Persisted(String),
    /// Locally minted token for a not-yet-persisted entry
    Local(Uuid),
}

impl MessageId {
    /// Mint a fresh local token.
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    /// True for locally minted (non-persisted) identities.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "{}", id),
            Self::Local(token) => write!(f, "local-{}", token),
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone)]
pub struct Message {
    /// Entry identity; local until the store assigns a persisted id
    pub id: MessageId,
    /// Author role
    pub role: Role,
    /// Message text. Mutable only while the entry is a streaming
    /// placeholder; immutable once finalized.
    pub content: String,
    /// Creation timestamp; within one chat, entries are totally ordered by
    /// this field with ties broken by insertion order.
    pub created_at: DateTime<Utc>,
}

/// Ordered message list for the active conversation, with an id index.
///
/// Lookups by id go through an explicit position index rather than a linear
/// scan, so [`finalize`](Self::finalize) and
/// [`merge_pushed`](Self::merge_pushed) stay cheap as the transcript grows.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with the store's ordered message list.
    ///
    /// Called when a conversation is selected; the store is responsible for
    /// ordering (`created_at` ascending, insertion order on ties).
    pub fn load(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.rebuild_index();
    }

    /// Append a finalized user message under a fresh local id.
    ///
    /// This is the optimistic copy shown while the insert is in flight; the
    /// persisted counterpart later replaces it via
    /// [`finalize`](Self::finalize).
    pub fn append_user(&mut self, content: impl Into<String>) -> MessageId {
        let id = MessageId::local();
        self.push(Message {
            id: id.clone(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        });
        id
    }

    /// Append an empty assistant placeholder and return its local id.
    ///
    /// The caller (the orchestrator's single-flight discipline) guarantees
    /// no other placeholder is open for this conversation.
    pub fn begin_placeholder(&mut self) -> MessageId {
        let id = MessageId::local();
        self.push(Message {
            id: id.clone(),
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
        });
        id
    }

    /// Concatenate a streamed fragment onto the placeholder's content.
    ///
    /// Fragments are applied in arrival order; no other ordering exists.
    /// Unknown ids are ignored (the placeholder may already be gone after a
    /// failure or conversation switch).
    pub fn append_fragment(&mut self, id: &MessageId, fragment: &str) {
        match self.index.get(id) {
            Some(&pos) => self.messages[pos].content.push_str(fragment),
            None => tracing::debug!("fragment for unknown entry {} dropped", id),
        }
    }

    /// Replace a local entry with its persisted counterpart.
    ///
    /// The placeholder id is retired. When the push channel has already
    /// inserted the same persisted id (the race described in the module
    /// docs), the first arrival is canonical: the placeholder entry is
    /// removed and the pushed entry kept. When the local id is gone and the
    /// persisted id exists, this is a no-op; when neither exists, the
    /// persisted message is appended so the reply stays visible.
    pub fn finalize(&mut self, local_id: &MessageId, persisted: Message) {
        let existing = self.index.get(&persisted.id).copied();
        match (self.index.get(local_id).copied(), existing) {
            (Some(pos), None) => {
                self.index.remove(local_id);
                self.index.insert(persisted.id.clone(), pos);
                self.messages[pos] = persisted;
            }
            (Some(pos), Some(_)) => {
                // Push raced ahead of finalize: keep the pushed entry,
                // drop the placeholder.
                tracing::debug!("finalize found {} already merged; dropping placeholder", persisted.id);
                self.remove_at(pos);
            }
            (None, Some(_)) => {
                tracing::debug!("finalize for retired entry {}; already present", persisted.id);
            }
            (None, None) => {
                tracing::debug!("finalize for retired entry {}; appending persisted copy", persisted.id);
                self.push(persisted);
            }
        }
    }

    /// Merge a message delivered by the push-notification channel.
    ///
    /// A no-op when the persisted id is already present (the reply was
    /// already finalized, or a previous notification delivered it). Returns
    /// whether the message was appended.
    pub fn merge_pushed(&mut self, persisted: Message) -> bool {
        if self.index.contains_key(&persisted.id) {
            tracing::debug!("pushed message {} already present; deduplicated", persisted.id);
            return false;
        }
        self.push(persisted);
        true
    }

    /// Remove an entry by id (the failure path for an open placeholder).
    pub fn remove(&mut self, id: &MessageId) {
        if let Some(pos) = self.index.get(id).copied() {
            self.remove_at(pos);
        }
    }

    /// Ordered view of the transcript.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the transcript has no entries.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
    }

    fn push(&mut self, message: Message) {
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
    }

    fn remove_at(&mut self, pos: usize) {
        let removed = self.messages.remove(pos);
        self.index.remove(&removed.id);
        // Positions after the removal point shifted down by one.
        for entry in self.index.values_mut() {
            if *entry > pos {
                *entry -= 1;
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .messages
            .iter()
            .enumerate()
            .map(|(pos, m)| (m.id.clone(), pos))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(id: &str, role: Role, content: &str) -> Message {
        Message {
            id: MessageId::Persisted(id.to_string()),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_role_roundtrip() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_local_ids_are_unique() {
        assert_ne!(MessageId::local(), MessageId::local());
    }

    #[test]
    fn test_local_id_never_equals_persisted() {
        let local = MessageId::local();
        if let MessageId::Local(token) = &local {
            let persisted = MessageId::Persisted(token.to_string());
            assert_ne!(local, persisted);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_append_user() {
        let mut transcript = Transcript::new();
        let id = transcript.append_user("Hello");

        assert_eq!(transcript.len(), 1);
        assert!(id.is_local());
        let entry = transcript.get(&id).unwrap();
        assert_eq!(entry.role, Role::User);
        assert_eq!(entry.content, "Hello");
    }

    #[test]
    fn test_begin_placeholder_is_empty_assistant() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_placeholder();

        let entry = transcript.get(&id).unwrap();
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.content, "");
    }

    #[test]
    fn test_append_fragment_accumulates_in_arrival_order() {
        let mut transcript = Transcript::new();
        let id = transcript.begin_placeholder();

        transcript.append_fragment(&id, "Hi");
        transcript.append_fragment(&id, " there!");

        assert_eq!(transcript.get(&id).unwrap().content, "Hi there!");
    }

    #[test]
    fn test_append_fragment_for_unknown_id_is_ignored() {
        let mut transcript = Transcript::new();
        transcript.append_fragment(&MessageId::local(), "lost");
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_finalize_replaces_placeholder_in_place() {
        let mut transcript = Transcript::new();
        transcript.append_user("question");
        let pid = transcript.begin_placeholder();
        transcript.append_fragment(&pid, "answer");

        transcript.finalize(&pid, persisted("m-1", Role::Assistant, "answer"));

        assert_eq!(transcript.len(), 2);
        assert_eq!(
            transcript.messages()[1].id,
            MessageId::Persisted("m-1".to_string())
        );
        assert_eq!(transcript.messages()[1].content, "answer");
        // The local id is retired.
        assert!(transcript.get(&pid).is_none());
    }

    #[test]
    fn test_finalize_promotes_optimistic_user_copy() {
        let mut transcript = Transcript::new();
        let local = transcript.append_user("Hello");

        transcript.finalize(&local, persisted("u-1", Role::User, "Hello"));

        assert_eq!(transcript.len(), 1);
        assert_eq!(
            transcript.messages()[0].id,
            MessageId::Persisted("u-1".to_string())
        );
    }

    #[test]
    fn test_merge_pushed_appends_new_message() {
        let mut transcript = Transcript::new();
        let appended = transcript.merge_pushed(persisted("m-1", Role::Assistant, "pushed"));

        assert!(appended);
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_merge_pushed_deduplicates_existing_id() {
        let mut transcript = Transcript::new();
        let pid = transcript.begin_placeholder();
        transcript.finalize(&pid, persisted("m-1", Role::Assistant, "answer"));

        let appended = transcript.merge_pushed(persisted("m-1", Role::Assistant, "answer"));

        assert!(!appended);
        assert_eq!(transcript.len(), 1);
    }

    /// merge_pushed(x); finalize(pid, x) and finalize(pid, x);
    /// merge_pushed(x) both end with exactly one visible entry for x.
    #[test]
    fn test_merge_and_finalize_commute_under_identical_id() {
        // Order 1: push first, then finalize.
        let mut transcript = Transcript::new();
        let pid = transcript.begin_placeholder();
        transcript.append_fragment(&pid, "answer");
        transcript.merge_pushed(persisted("m-1", Role::Assistant, "answer"));
        transcript.finalize(&pid, persisted("m-1", Role::Assistant, "answer"));

        let count = |t: &Transcript| {
            t.messages()
                .iter()
                .filter(|m| m.id == MessageId::Persisted("m-1".to_string()))
                .count()
        };
        assert_eq!(count(&transcript), 1);
        assert_eq!(transcript.len(), 1);
        assert!(transcript.get(&pid).is_none());

        // Order 2: finalize first, then push.
        let mut transcript = Transcript::new();
        let pid = transcript.begin_placeholder();
        transcript.append_fragment(&pid, "answer");
        transcript.finalize(&pid, persisted("m-1", Role::Assistant, "answer"));
        transcript.merge_pushed(persisted("m-1", Role::Assistant, "answer"));

        assert_eq!(count(&transcript), 1);
        assert_eq!(transcript.len(), 1);
    }

    /// First arrival is canonical when contents differ.
    #[test]
    fn test_pushed_entry_wins_when_it_arrives_first() {
        let mut transcript = Transcript::new();
        let pid = transcript.begin_placeholder();
        transcript.merge_pushed(persisted("m-1", Role::Assistant, "from another writer"));
        transcript.finalize(&pid, persisted("m-1", Role::Assistant, "local accumulation"));

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.messages()[0].content, "from another writer");
    }

    #[test]
    fn test_finalize_after_retirement_is_idempotent() {
        let mut transcript = Transcript::new();
        let pid = transcript.begin_placeholder();
        transcript.finalize(&pid, persisted("m-1", Role::Assistant, "answer"));
        // Second call with the retired id and the same persisted message.
        transcript.finalize(&pid, persisted("m-1", Role::Assistant, "answer"));

        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn test_remove_discards_placeholder_and_reindexes() {
        let mut transcript = Transcript::new();
        let user = transcript.append_user("question");
        let pid = transcript.begin_placeholder();
        let trailing = transcript.merge_pushed(persisted("m-9", Role::Assistant, "other"));
        assert!(trailing);

        transcript.remove(&pid);

        assert_eq!(transcript.len(), 2);
        assert!(transcript.get(&pid).is_none());
        // Entries around the removal point are still addressable.
        assert_eq!(transcript.get(&user).unwrap().content, "question");
        assert_eq!(
            transcript
                .get(&MessageId::Persisted("m-9".to_string()))
                .unwrap()
                .content,
            "other"
        );
    }

    #[test]
    fn test_load_replaces_contents() {
        let mut transcript = Transcript::new();
        transcript.append_user("stale");

        transcript.load(vec![
            persisted("u-1", Role::User, "hello"),
            persisted("m-1", Role::Assistant, "hi"),
        ]);

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].content, "hello");
        assert!(transcript
            .get(&MessageId::Persisted("m-1".to_string()))
            .is_some());
    }

    #[test]
    fn test_clear() {
        let mut transcript = Transcript::new();
        transcript.append_user("x");
        transcript.clear();
        assert!(transcript.is_empty());
    }
}
