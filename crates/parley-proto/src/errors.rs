//! Protocol-layer error types.

use thiserror::Error;

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames and payloads.
///
/// These are structural errors only: a frame that decodes cleanly may still
/// be rejected later by the router (authorization, unknown conversation).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer too short to contain a complete frame header.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Magic number mismatch; the stream does not carry parley frames.
    #[error("invalid magic number")]
    InvalidMagic,

    /// Protocol version not supported by this implementation.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload size exceeds the protocol maximum.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Protocol maximum
        max: usize,
    },

    /// Header claims a different payload length than the frame carries.
    #[error("payload size mismatch: header claims {claimed}, frame carries {actual}")]
    PayloadSizeMismatch {
        /// Size recorded in the header
        claimed: usize,
        /// Size of the payload actually present
        actual: usize,
    },

    /// Opcode not recognized by this implementation.
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    /// Payload type does not match the header opcode.
    #[error("payload mismatch: expected {expected} for opcode {opcode:#06x}")]
    PayloadMismatch {
        /// Expected payload type name
        expected: &'static str,
        /// Opcode from the frame header
        opcode: u16,
    },

    /// CBOR serialization failed.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
