//! In-memory store implementation.
//!
//! Backs development deployments and the test suites. All state lives in a
//! single mutex-guarded map set; operations are O(1) except the
//! conversation scans, which are O(messages in conversation).

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex;

use super::{ChatStore, HistoryPage, StoreError, StoredMessage};

/// In-memory [`ChatStore`].
///
/// Clones share the same underlying state via `Arc`. Conversations are
/// seeded through [`MemoryStore::add_conversation`] - the relay itself
/// never creates them, matching the production contract where conversation
/// lifecycle belongs to an external collaborator.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Conversation id → participants and ordered message ids
    conversations: HashMap<u128, ConversationRecord>,

    /// Message id → message
    messages: HashMap<u64, StoredMessage>,

    /// Next message id (monotonic; ids double as creation-order tiebreaker)
    next_message_id: u64,

    /// Next conversation id for seeding
    next_conversation_id: u128,

    /// When true, the next `create_message` fails with `Unavailable`
    fail_next_create: bool,
}

struct ConversationRecord {
    participants: HashSet<u64>,
    /// Message ids in creation order (ascending)
    message_ids: Vec<u64>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation with the given participants, returning its id.
    pub fn add_conversation(&self, participants: &[u64]) -> u128 {
        let mut inner = self.inner.lock();
        inner.next_conversation_id += 1;
        let id = inner.next_conversation_id;

        inner.conversations.insert(id, ConversationRecord {
            participants: participants.iter().copied().collect(),
            message_ids: Vec::new(),
        });

        id
    }

    /// Make the next `create_message` fail with [`StoreError::Unavailable`].
    ///
    /// Fault injection for tests: a send that hits this must surface as a
    /// failed send with no fan-out.
    pub fn fail_next_create(&self) {
        self.inner.lock().fail_next_create = true;
    }

    /// Total number of persisted messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Fetch a message by id. `None` if unknown.
    #[must_use]
    pub fn message(&self, message_id: u64) -> Option<StoredMessage> {
        self.inner.lock().messages.get(&message_id).cloned()
    }
}

impl ChatStore for MemoryStore {
    fn create_message(
        &self,
        conversation_id: u128,
        sender_id: u64,
        content: &str,
        created_at_ms: u64,
    ) -> Result<StoredMessage, StoreError> {
        let mut inner = self.inner.lock();

        if inner.fail_next_create {
            inner.fail_next_create = false;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }

        if !inner.conversations.contains_key(&conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id));
        }

        inner.next_message_id += 1;
        let message_id = inner.next_message_id;

        let message = StoredMessage {
            message_id,
            conversation_id,
            sender_id,
            content: content.to_string(),
            created_at_ms,
            seen_by: HashSet::new(),
        };

        inner.messages.insert(message_id, message.clone());
        if let Some(conversation) = inner.conversations.get_mut(&conversation_id) {
            conversation.message_ids.push(message_id);
        }

        Ok(message)
    }

    fn list_participants(&self, conversation_id: u128) -> Result<HashSet<u64>, StoreError> {
        let inner = self.inner.lock();

        inner
            .conversations
            .get(&conversation_id)
            .map(|c| c.participants.clone())
            .ok_or(StoreError::ConversationNotFound(conversation_id))
    }

    fn mark_seen(&self, message_id: u64, user_id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(StoreError::MessageNotFound(message_id))?;

        message.seen_by.insert(user_id);
        Ok(())
    }

    fn unseen_by(&self, conversation_id: u128, reader_id: u64) -> Result<Vec<u64>, StoreError> {
        let inner = self.inner.lock();

        let conversation = inner
            .conversations
            .get(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;

        Ok(conversation
            .message_ids
            .iter()
            .filter(|id| {
                inner
                    .messages
                    .get(id)
                    .is_some_and(|m| m.sender_id != reader_id && !m.seen_by.contains(&reader_id))
            })
            .copied()
            .collect())
    }

    fn conversations_for(&self, user_id: u64) -> Result<Vec<u128>, StoreError> {
        let inner = self.inner.lock();

        Ok(inner
            .conversations
            .iter()
            .filter(|(_, c)| c.participants.contains(&user_id))
            .map(|(id, _)| *id)
            .collect())
    }

    fn list_before(
        &self,
        conversation_id: u128,
        before_message_id: Option<u64>,
        limit: usize,
    ) -> Result<HistoryPage, StoreError> {
        let inner = self.inner.lock();

        let conversation = inner
            .conversations
            .get(&conversation_id)
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;

        // message_ids is ascending in canonical order; take the window of
        // ids strictly older than the cursor
        let end = match before_message_id {
            Some(cursor) => conversation.message_ids.partition_point(|&id| id < cursor),
            None => conversation.message_ids.len(),
        };

        let start = end.saturating_sub(limit);
        let messages = conversation.message_ids[start..end]
            .iter()
            .rev() // newest first
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect();

        Ok(HistoryPage { messages, has_more: start > 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_message_requires_conversation() {
        let store = MemoryStore::new();
        let result = store.create_message(999, 1, "hi", 0);
        assert!(matches!(result, Err(StoreError::ConversationNotFound(999))));
    }

    #[test]
    fn message_ids_are_monotonic() {
        let store = MemoryStore::new();
        let conv = store.add_conversation(&[1, 2]);

        let a = store.create_message(conv, 1, "a", 10).unwrap();
        let b = store.create_message(conv, 2, "b", 10).unwrap();

        assert!(b.message_id > a.message_id);
    }

    #[test]
    fn unseen_excludes_own_and_seen_messages() {
        let store = MemoryStore::new();
        let conv = store.add_conversation(&[1, 2]);

        let own = store.create_message(conv, 2, "mine", 0).unwrap();
        let unseen = store.create_message(conv, 1, "theirs", 1).unwrap();
        let seen = store.create_message(conv, 1, "already read", 2).unwrap();
        store.mark_seen(seen.message_id, 2).unwrap();

        let ids = store.unseen_by(conv, 2).unwrap();
        assert_eq!(ids, vec![unseen.message_id]);
        assert!(!ids.contains(&own.message_id));
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let store = MemoryStore::new();
        let conv = store.add_conversation(&[1, 2]);
        let msg = store.create_message(conv, 1, "hi", 0).unwrap();

        store.mark_seen(msg.message_id, 2).unwrap();
        store.mark_seen(msg.message_id, 2).unwrap();

        let stored = store.message(msg.message_id).unwrap();
        assert_eq!(stored.seen_by.len(), 1);
    }

    #[test]
    fn list_before_paginates_newest_first() {
        let store = MemoryStore::new();
        let conv = store.add_conversation(&[1, 2]);

        let ids: Vec<u64> = (0..5)
            .map(|i| store.create_message(conv, 1, &format!("m{i}"), i).unwrap().message_id)
            .collect();

        // First page: newest two
        let page = store.list_before(conv, None, 2).unwrap();
        assert_eq!(
            page.messages.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![ids[4], ids[3]]
        );
        assert!(page.has_more);

        // Next page resumes from the cursor
        let page = store.list_before(conv, Some(ids[3]), 2).unwrap();
        assert_eq!(
            page.messages.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![ids[2], ids[1]]
        );
        assert!(page.has_more);

        // Final page
        let page = store.list_before(conv, Some(ids[1]), 2).unwrap();
        assert_eq!(
            page.messages.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![ids[0]]
        );
        assert!(!page.has_more);
    }

    #[test]
    fn injected_failure_hits_once() {
        let store = MemoryStore::new();
        let conv = store.add_conversation(&[1, 2]);

        store.fail_next_create();
        assert!(matches!(
            store.create_message(conv, 1, "lost", 0),
            Err(StoreError::Unavailable(_))
        ));

        // Subsequent writes succeed
        assert!(store.create_message(conv, 1, "kept", 1).is_ok());
        assert_eq!(store.message_count(), 1);
    }

    #[test]
    fn conversations_for_filters_by_participant() {
        let store = MemoryStore::new();
        let c1 = store.add_conversation(&[1, 2]);
        let c2 = store.add_conversation(&[1, 3]);
        let c3 = store.add_conversation(&[2, 3]);

        let mut convs = store.conversations_for(1).unwrap();
        convs.sort_unstable();
        assert_eq!(convs, vec![c1, c2]);
        assert!(!convs.contains(&c3));
    }
}
