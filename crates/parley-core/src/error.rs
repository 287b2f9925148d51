//! Error types for the protocol core.
//!
//! Connection lifecycle errors live here; credential errors live in
//! [`crate::auth`]. We avoid `std::io::Error` in protocol logic so failure
//! classes stay distinguishable at the boundary.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from the connection state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current state.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when the error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Received a frame that is not valid for the current state.
    #[error("unexpected frame: opcode {opcode:#06x} in state {state:?}")]
    UnexpectedFrame {
        /// Current state when the frame arrived
        state: ConnectionState,
        /// Opcode of the unexpected frame
        opcode: u16,
    },

    /// Client requested an unsupported protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Frame parsing or payload validation failed.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<parley_proto::ProtocolError> for ConnectionError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
