//! Persistence boundary for messages and conversations.
//!
//! The relay never owns conversation lifecycle or durable message storage;
//! it talks to an external store through this narrow trait. The trait is
//! synchronous - implementations are expected to answer from memory or a
//! local cache, and the router never holds an in-memory lock across a store
//! call.

mod error;
mod memory;

use std::collections::HashSet;

pub use error::StoreError;
pub use memory::MemoryStore;

/// A persisted message.
///
/// Immutable after creation except for `seen_by`, which only grows.
/// Message ids are allocated monotonically by the store, so
/// `(created_at_ms, message_id)` yields one canonical order per
/// conversation for both delivery and history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Store-assigned identifier, monotonic per store.
    pub message_id: u64,
    /// Conversation the message belongs to.
    pub conversation_id: u128,
    /// Authoring user.
    pub sender_id: u64,
    /// Message body.
    pub content: String,
    /// Persistence timestamp in unix milliseconds.
    pub created_at_ms: u64,
    /// Users who have seen this message. Append-only.
    pub seen_by: HashSet<u64>,
}

/// One page of reverse-paginated history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Messages in reverse canonical order (newest first).
    pub messages: Vec<StoredMessage>,
    /// True if older messages remain beyond this page.
    pub has_more: bool,
}

/// External persistence store consumed by the router.
///
/// Must be `Clone + Send + Sync`: clones share the same underlying storage
/// and are handed to concurrently running connection tasks.
pub trait ChatStore: Clone + Send + Sync + 'static {
    /// Persist a new message.
    ///
    /// The message is only considered sent once this returns `Ok`; on error
    /// nothing may be fanned out to recipients.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConversationNotFound`] for an unknown conversation
    /// - [`StoreError::Unavailable`] if the write failed
    fn create_message(
        &self,
        conversation_id: u128,
        sender_id: u64,
        content: &str,
        created_at_ms: u64,
    ) -> Result<StoredMessage, StoreError>;

    /// Participant set of a conversation.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConversationNotFound`] for an unknown conversation
    fn list_participants(&self, conversation_id: u128) -> Result<HashSet<u64>, StoreError>;

    /// Mark a message as seen by a user. Idempotent; `seen_by` only grows.
    ///
    /// # Errors
    ///
    /// - [`StoreError::MessageNotFound`] for an unknown message
    fn mark_seen(&self, message_id: u64, user_id: u64) -> Result<(), StoreError>;

    /// IDs of messages in a conversation that were authored by others and
    /// not yet seen by `reader_id`, in canonical order.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConversationNotFound`] for an unknown conversation
    fn unseen_by(&self, conversation_id: u128, reader_id: u64) -> Result<Vec<u64>, StoreError>;

    /// Conversations the user participates in.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Unavailable`] if the store cannot answer
    fn conversations_for(&self, user_id: u64) -> Result<Vec<u128>, StoreError>;

    /// Reverse-paginated history: up to `limit` messages strictly older
    /// than `before_message_id` (or the newest messages when `None`),
    /// newest first.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConversationNotFound`] for an unknown conversation
    fn list_before(
        &self,
        conversation_id: u128,
        before_message_id: Option<u64>,
        limit: usize,
    ) -> Result<HistoryPage, StoreError>;
}
