//! Server error types.
//!
//! Two layers: [`RelayError`] for routing operations (reported back to the
//! originating connection as a rejection frame, connection stays open) and
//! [`ServerError`] for connection/runtime failures (terminate the
//! connection or the server).

use parley_core::auth::AuthError;
use thiserror::Error;

use crate::store::StoreError;

/// Failures of a routing operation.
///
/// Every variant maps to exactly one rejection or close behavior; no
/// routing path panics or leaks an unclassified error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Session ID already registered.
    ///
    /// The handshake is aborted and the connection closed; the client
    /// should reconnect (a fresh random session ID will be drawn).
    #[error("duplicate session: {0}")]
    DuplicateSession(u64),

    /// Sender is not a participant of the conversation.
    ///
    /// Reported to the originating connection as a rejection frame; the
    /// connection stays open.
    #[error("user {user_id} is not a participant of conversation {conversation_id:032x}")]
    Forbidden {
        /// User that attempted the operation
        user_id: u64,
        /// Conversation the operation targeted
        conversation_id: u128,
    },

    /// Referenced conversation does not exist.
    ///
    /// Reported as a rejection frame; the connection stays open.
    #[error("conversation not found: {0:032x}")]
    NotFound(u128),

    /// The persistence store failed the operation.
    ///
    /// For sends this means the message was NOT sent and nothing was fanned
    /// out; the client must retry.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Frame type not valid in this direction or at this time.
    #[error("unexpected frame: opcode {0:#06x}")]
    UnexpectedFrame(u16),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound(id) => Self::NotFound(id),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Connection- and runtime-level failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration (bind address, TLS material, issuer key).
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure (QUIC/TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// Credential verification failed; the connection is terminated.
    #[error("handshake rejected: {0}")]
    Unauthenticated(#[from] AuthError),

    /// Peer lost stream framing or exceeded the decode-failure budget; the
    /// connection is terminated.
    #[error("protocol abuse: {0}")]
    ProtocolAbuse(String),

    /// Structurally invalid traffic that is not recoverable.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Routing failure escalated to the connection level
    /// (duplicate session at handshake).
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl From<parley_proto::ProtocolError> for ServerError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err = RelayError::from(StoreError::ConversationNotFound(5));
        assert_eq!(err, RelayError::NotFound(5));
    }

    #[test]
    fn store_unavailable_maps_to_persistence() {
        let err = RelayError::from(StoreError::Unavailable("disk gone".to_string()));
        assert!(matches!(err, RelayError::Persistence(_)));
    }

    #[test]
    fn relay_error_display() {
        let err = RelayError::Forbidden { user_id: 7, conversation_id: 1 };
        assert!(err.to_string().contains("not a participant"));

        let err = RelayError::DuplicateSession(42);
        assert_eq!(err.to_string(), "duplicate session: 42");
    }
}
