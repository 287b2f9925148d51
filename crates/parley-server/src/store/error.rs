//! Storage error types.

use thiserror::Error;

/// Errors from the persistence store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Conversation does not exist.
    ///
    /// Conversations are created by an external collaborator; the relay
    /// never creates them on demand.
    #[error("conversation not found: {0:032x}")]
    ConversationNotFound(u128),

    /// Message does not exist.
    #[error("message not found: {0}")]
    MessageNotFound(u64),

    /// Store unreachable or the operation failed.
    ///
    /// May be transient; a send that hits this is reported to the client as
    /// a failed send to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
