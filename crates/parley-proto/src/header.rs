//! Frame header with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 64-byte structure serialized as raw binary
//! (Big Endian). Routing decisions (opcode, conversation, sender) never
//! require payload deserialization.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 64-byte frame header (Big Endian network byte order).
///
/// Fields are stored as raw byte arrays to avoid alignment issues; the whole
/// header fits one 64-byte CPU cache line. All multi-byte integers use
/// network byte order.
///
/// # Invariants
///
/// - `payload_size` MUST match the length of the payload that follows.
///   Enforced by [`crate::Frame::new`] and verified by [`crate::Frame::decode`].
/// - `payload_size` MUST NOT exceed [`FrameHeader::MAX_PAYLOAD_SIZE`].
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits means every 64-byte
/// pattern is a structurally valid cast target, so parsing untrusted network
/// bytes cannot cause undefined behavior. Structural validity is all this
/// type guarantees: the sender identity in outbound frames is stamped by the
/// server, and inbound frames are attributed to the authenticated session,
/// never to the header's claim.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],             // 0x5041524C ("PARL" in ASCII)
    version: u8,                // 0x01
    flags: u8,                  // reserved bitfield
    pub(crate) opcode: [u8; 2], // u16 operation code

    // Request metadata (8 bytes: 8-15)
    request_id: [u8; 4],              // u32 client nonce, echoed in replies
    pub(crate) payload_size: [u8; 4], // u32 payload length

    // Routing context (24 bytes: 16-39)
    conversation_id: [u8; 16], // UUID, zero when not conversation-scoped
    sender_id: [u8; 8],        // u64, server-stamped on outbound frames

    // Server timestamp (8 bytes: 40-47)
    timestamp_ms: [u8; 8], // u64 unix milliseconds, server-stamped

    // Reserved (16 bytes: 48-63)
    reserved: [u8; 16],
}

impl FrameHeader {
    /// Size of the serialized header (64 bytes, one cache line).
    pub const SIZE: usize = 64;

    /// Magic number: "PARL" in ASCII.
    pub const MAGIC: u32 = 0x5041_524C;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (1 MiB). Chat payloads are small; anything near
    /// this limit indicates a broken or hostile peer.
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a new header with the specified opcode.
    ///
    /// All routing fields start zeroed; use the setters to fill them in.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            request_id: [0; 4],
            payload_size: [0; 4],
            conversation_id: [0; 16],
            sender_id: [0; 8],
            timestamp_ms: [0; 8],
            reserved: [0; 16],
        }
    }

    /// Parse a header from network bytes (zero-copy).
    ///
    /// Validates cheapest-first: length, magic, version, payload size. Does
    /// NOT validate the opcode - unknown opcodes are a recoverable condition
    /// handled above this layer (the payload length is still trustworthy, so
    /// the frame can be skipped without losing stream framing).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooShort`] if fewer than 64 bytes
    /// - [`ProtocolError::InvalidMagic`] on magic mismatch
    /// - [`ProtocolError::UnsupportedVersion`] on version mismatch
    /// - [`ProtocolError::PayloadTooLarge`] if the claimed size exceeds the maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol magic number.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Reserved flags byte.
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Client-assigned nonce, echoed in replies and rejections.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        u32::from_be_bytes(self.request_id)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Conversation this frame is scoped to. Zero when not applicable.
    #[must_use]
    pub fn conversation_id(&self) -> u128 {
        u128::from_be_bytes(self.conversation_id)
    }

    /// Originating user. Stamped by the server on outbound frames; ignored
    /// on inbound frames in favor of the authenticated session identity.
    #[must_use]
    pub fn sender_id(&self) -> u64 {
        u64::from_be_bytes(self.sender_id)
    }

    /// Server wall-clock timestamp in unix milliseconds. Zero on inbound
    /// frames.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        u64::from_be_bytes(self.timestamp_ms)
    }

    /// Set the client request nonce.
    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id.to_be_bytes();
    }

    /// Set the conversation scope.
    pub fn set_conversation_id(&mut self, conversation_id: u128) {
        self.conversation_id = conversation_id.to_be_bytes();
    }

    /// Set the originating user.
    pub fn set_sender_id(&mut self, sender_id: u64) {
        self.sender_id = sender_id.to_be_bytes();
    }

    /// Set the server timestamp.
    pub fn set_timestamp_ms(&mut self, timestamp_ms: u64) {
        self.timestamp_ms = timestamp_ms.to_be_bytes();
    }

    /// Set the payload size. [`crate::Frame::new`] does this automatically.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("opcode", &format!("{:#06x}", self.opcode()))
            .field("request_id", &self.request_id())
            .field("conversation_id", &format!("{:#034x}", self.conversation_id()))
            .field("sender_id", &self.sender_id())
            .field("timestamp_ms", &self.timestamp_ms())
            .field("payload_size", &self.payload_size())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_one_cache_line() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
        assert_eq!(FrameHeader::SIZE, 64);
    }

    #[test]
    fn new_header_round_trips() {
        let mut header = FrameHeader::new(Opcode::Send);
        header.set_conversation_id(0x1234_5678_90ab_cdef_1234_5678_90ab_cdef);
        header.set_sender_id(42);
        header.set_request_id(7);
        header.set_timestamp_ms(1_700_000_000_123);
        header.set_payload_size(256);

        let bytes = header.to_bytes();
        let parsed = FrameHeader::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.opcode_enum(), Some(Opcode::Send));
        assert_eq!(parsed.conversation_id(), 0x1234_5678_90ab_cdef_1234_5678_90ab_cdef);
        assert_eq!(parsed.sender_id(), 42);
        assert_eq!(parsed.request_id(), 7);
        assert_eq!(parsed.timestamp_ms(), 1_700_000_000_123);
        assert_eq!(parsed.payload_size(), 256);
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = [0u8; 32];
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::FrameTooShort { expected: 64, actual: 32 })
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = FrameHeader::new(Opcode::Ping).to_bytes();
        bytes[0] = 0xFF;
        assert!(matches!(FrameHeader::from_bytes(&bytes), Err(ProtocolError::InvalidMagic)));
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = FrameHeader::new(Opcode::Ping).to_bytes();
        bytes[4] = 0x7F;
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::UnsupportedVersion(0x7F))
        ));
    }

    #[test]
    fn rejects_oversized_payload_claim() {
        let mut header = FrameHeader::new(Opcode::Send);
        header.set_payload_size(FrameHeader::MAX_PAYLOAD_SIZE + 1);
        let bytes = header.to_bytes();
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_opcode_still_parses() {
        let mut bytes = FrameHeader::new(Opcode::Ping).to_bytes();
        bytes[6] = 0x77;
        bytes[7] = 0x77;

        let parsed = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.opcode(), 0x7777);
        assert_eq!(parsed.opcode_enum(), None);
    }
}
