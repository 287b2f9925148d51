//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet: a 64-byte raw binary header
//! followed by the payload bytes (already CBOR-encoded). This is a pure data
//! holder; for typed access see [`Payload::into_frame`] and
//! [`Payload::from_frame`].
//!
//! [`Payload::into_frame`]: crate::Payload::into_frame
//! [`Payload::from_frame`]: crate::Payload::from_frame

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame.
///
/// Layout on the wire: `[FrameHeader: 64 bytes] + [payload: variable]`.
///
/// Holds raw payload bytes, NOT the [`crate::Payload`] enum, so the relay
/// can route and fan out frames without deserializing their content.
///
/// # Invariants
///
/// - `payload.len()` always matches `header.payload_size()`; enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`];
///   rejected during decoding and encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (64 bytes)
    pub header: FrameHeader,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, setting the header's payload size to match.
    ///
    /// The size field is stamped here, so a `Frame` can never be constructed
    /// with a header that disagrees with its payload.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Bytes is bounded by isize::MAX and the protocol caps payloads at
        // 1 MiB, so the length always fits a u32.
        let payload_len = payload.len() as u32;
        header.set_payload_size(payload_len);

        Self { header, payload }
    }

    /// Total encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// Encode the frame into a buffer.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    ///   [`FrameHeader::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode a frame from a complete buffer.
    ///
    /// The buffer must contain exactly one frame (header plus the payload
    /// length the header claims).
    ///
    /// # Errors
    ///
    /// - Any header validation error from [`FrameHeader::from_bytes`]
    /// - [`ProtocolError::PayloadSizeMismatch`] if the buffer length does not
    ///   match the header's claim
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *FrameHeader::from_bytes(bytes)?;
        let claimed = header.payload_size() as usize;
        let actual = bytes.len() - FrameHeader::SIZE;

        if claimed != actual {
            return Err(ProtocolError::PayloadSizeMismatch { claimed, actual });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..]);

        Ok(Self { header, payload })
    }
}
