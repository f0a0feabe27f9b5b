//! Push reconciliation for the active conversation
//!
//! Independently of the streamed reply, the record store notifies
//! subscribers about newly persisted messages. [`PushReconciler`] consumes
//! that channel for the active chat and forwards assistant inserts to a
//! merge callback; the transcript's dedup rules make a forwarded message
//! that the orchestrator already finalized a no-op.
//!
//! The reconciler is torn down (task aborted, subscription dropped) whenever
//! the active conversation changes or the session retires, so notifications
//! for a conversation that is no longer active are never processed.

use crate::store::{MessageRecord, MessageSubscription};
use crate::transcript::Role;

use tokio::task::JoinHandle;

/// Owns the background task draining one chat's insert notifications.
///
/// Dropping the reconciler aborts the task, which drops the subscription.
#[derive(Debug)]
pub struct PushReconciler {
    chat_id: String,
    handle: JoinHandle<()>,
}

impl PushReconciler {
    /// Spawn a reconciler over an established subscription.
    ///
    /// `on_insert` receives every assistant message persisted into the
    /// subscribed chat; non-assistant inserts are ignored (the orchestrator
    /// already placed the user's own messages). The callback is responsible
    /// for the active-conversation guard and the dedup merge.
    pub fn spawn<F>(mut subscription: MessageSubscription, on_insert: F) -> Self
    where
        F: Fn(MessageRecord) + Send + Sync + 'static,
    {
        let chat_id = subscription.chat_id().to_string();
        let task_chat_id = chat_id.clone();

        let handle = tokio::spawn(async move {
            while let Some(record) = subscription.recv().await {
                match record.role {
                    Role::Assistant => on_insert(record),
                    Role::User => {
                        tracing::debug!(
                            "ignoring pushed user message for chat {}",
                            task_chat_id
                        );
                    }
                }
            }
            tracing::debug!("insert notifications closed for chat {}", task_chat_id);
        });

        Self { chat_id, handle }
    }

    /// The chat this reconciler is scoped to.
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

impl Drop for PushReconciler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChatStore, MemoryStore, NewMessage};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn insert(store: &MemoryStore, chat_id: &str, role: Role, content: &str) {
        store
            .insert_message(NewMessage {
                chat_id: chat_id.to_string(),
                role,
                content: content.to_string(),
            })
            .await
            .expect("insert failed");
    }

    #[tokio::test]
    async fn test_assistant_inserts_are_forwarded() {
        let store = MemoryStore::new();
        let chat = store.insert_chat("New Chat").await.unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _reconciler = PushReconciler::spawn(store.subscribe(&chat.id), move |record| {
            sink.lock().unwrap().push(record.content);
        });

        insert(&store, &chat.id, Role::Assistant, "pushed reply").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["pushed reply"]);
    }

    #[tokio::test]
    async fn test_user_inserts_are_ignored() {
        let store = MemoryStore::new();
        let chat = store.insert_chat("New Chat").await.unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _reconciler = PushReconciler::spawn(store.subscribe(&chat.id), move |record| {
            sink.lock().unwrap().push(record.content);
        });

        insert(&store, &chat.id, Role::User, "typed by the user").await;
        insert(&store, &chat.id, Role::Assistant, "reply").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["reply"]);
    }

    #[tokio::test]
    async fn test_other_chats_never_reach_the_callback() {
        let store = MemoryStore::new();
        let chat_a = store.insert_chat("A").await.unwrap();
        let chat_b = store.insert_chat("B").await.unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _reconciler = PushReconciler::spawn(store.subscribe(&chat_a.id), move |record| {
            sink.lock().unwrap().push(record.content);
        });

        insert(&store, &chat_b.id, Role::Assistant, "for b").await;
        insert(&store, &chat_a.id, Role::Assistant, "for a").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["for a"]);
    }

    #[tokio::test]
    async fn test_drop_stops_processing() {
        let store = MemoryStore::new();
        let chat = store.insert_chat("New Chat").await.unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reconciler = PushReconciler::spawn(store.subscribe(&chat.id), move |record| {
            sink.lock().unwrap().push(record.content);
        });

        drop(reconciler);
        // Give the abort a moment to land before inserting.
        tokio::time::sleep(Duration::from_millis(20)).await;

        insert(&store, &chat.id, Role::Assistant, "too late").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_id_accessor() {
        let store = MemoryStore::new();
        let chat = store.insert_chat("New Chat").await.unwrap();
        let reconciler = PushReconciler::spawn(store.subscribe(&chat.id), |_| {});
        assert_eq!(reconciler.chat_id(), chat.id);
    }
}
