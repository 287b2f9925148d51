//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary for routing speed; payloads use CBOR for
//! type safety and forward compatibility. The opcode in the frame header
//! determines the payload type, so only the inner struct is serialized - no
//! variant tag goes on the wire, which keeps a hostile peer from pairing a
//! mismatched opcode and payload.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Round-trip encoding must produce an equivalent value.

pub mod chat;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads.
///
/// Heartbeats and bodyless requests (`Ping`, `Pong`, `ReadReceipt`,
/// `StatusQuery`) are unit variants encoded as zero bytes; their routing
/// context lives entirely in the frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session management
    /// Handshake request carrying the credential
    Hello(session::Hello),
    /// Handshake completion
    HelloReply(session::HelloReply),
    /// Graceful disconnect
    Goodbye(session::Goodbye),
    /// Heartbeat probe
    Ping,
    /// Heartbeat response
    Pong,

    // Chat operations
    /// Send a message to the conversation in the header
    Send(chat::SendMessage),
    /// Mark the conversation in the header as read
    ReadReceipt,
    /// Advisory typing indicator
    Typing(chat::TypingIndicator),
    /// Batch presence request
    StatusQuery,
    /// Reverse-paginated history request
    History(chat::HistoryRequest),

    // Delivery
    /// Message delivered to a recipient
    MessageReceived(chat::MessageDelivery),
    /// Persisted-message acknowledgement to the sender
    SendAck(chat::SendAck),
    /// Unread counter update for one conversation
    UnreadCount(chat::UnreadCountUpdate),
    /// Presence transition for one user
    Presence(chat::PresenceUpdate),
    /// Batch presence reply
    StatusSnapshot(chat::StatusSnapshot),
    /// Read-receipt notification to the other participants
    MessagesRead(chat::MessagesRead),
    /// Page of message history
    HistoryReply(chat::HistoryReply),

    /// Per-request rejection
    Reject(RejectPayload),
}

/// Rejection payload for [`Opcode::Reject`] frames.
///
/// References the offending request via `request_id`; receiving one never
/// closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPayload {
    /// Rejection code identifying the failure class.
    pub code: u16,
    /// Request nonce of the frame being rejected.
    pub request_id: u32,
    /// Human-readable description.
    pub message: String,
}

impl RejectPayload {
    /// Sender is not a participant of the conversation.
    pub const FORBIDDEN: u16 = 0x0001;
    /// Conversation (or other referenced entity) does not exist.
    pub const NOT_FOUND: u16 = 0x0002;
    /// Persistence failed; the message was not sent and may be retried.
    pub const PERSISTENCE: u16 = 0x0003;
    /// Frame could not be decoded.
    pub const PROTOCOL: u16 = 0x0004;
    /// Credential verification failed.
    pub const UNAUTHENTICATED: u16 = 0x0005;

    /// Sender is not a participant of the conversation.
    #[must_use]
    pub fn forbidden(request_id: u32, conversation_id: u128) -> Self {
        Self {
            code: Self::FORBIDDEN,
            request_id,
            message: format!("not a participant of conversation {conversation_id:032x}"),
        }
    }

    /// Referenced conversation does not exist.
    #[must_use]
    pub fn not_found(request_id: u32, conversation_id: u128) -> Self {
        Self {
            code: Self::NOT_FOUND,
            request_id,
            message: format!("conversation not found: {conversation_id:032x}"),
        }
    }

    /// Persistence failed; the client must retry the send.
    pub fn persistence(request_id: u32, reason: impl Into<String>) -> Self {
        Self { code: Self::PERSISTENCE, request_id, message: reason.into() }
    }

    /// Frame was structurally invalid.
    pub fn protocol(request_id: u32, reason: impl Into<String>) -> Self {
        Self { code: Self::PROTOCOL, request_id, message: reason.into() }
    }

    /// Credential verification failed.
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHENTICATED, request_id: 0, message: reason.into() }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::Send(_) => Opcode::Send,
            Self::ReadReceipt => Opcode::ReadReceipt,
            Self::Typing(_) => Opcode::Typing,
            Self::StatusQuery => Opcode::StatusQuery,
            Self::History(_) => Opcode::History,
            Self::MessageReceived(_) => Opcode::MessageReceived,
            Self::SendAck(_) => Opcode::SendAck,
            Self::UnreadCount(_) => Opcode::UnreadCount,
            Self::Presence(_) => Opcode::Presence,
            Self::StatusSnapshot(_) => Opcode::StatusSnapshot,
            Self::MessagesRead(_) => Opcode::MessagesRead,
            Self::HistoryReply(_) => Opcode::HistoryReply,
            Self::Reject(_) => Opcode::Reject,
        }
    }

    /// Encode the payload into a buffer.
    ///
    /// Serializes only the inner struct; the frame header's opcode already
    /// identifies the payload type.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborEncode`] if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HelloReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Goodbye(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Ping | Self::Pong | Self::ReadReceipt | Self::StatusQuery => Ok(()),
            Self::Send(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Typing(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::History(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessageReceived(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::SendAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UnreadCount(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Presence(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::StatusSnapshot(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessagesRead(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HistoryReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Reject(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Build a frame carrying this payload.
    ///
    /// The header's opcode is overwritten to match the payload type, so a
    /// caller can never produce a mismatched pair.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborEncode`] if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        header.opcode = self.opcode().to_u16().to_be_bytes();

        let mut buf = Vec::new();
        self.encode(&mut buf)?;

        Ok(Frame::new(header, buf))
    }

    /// Decode the payload of a frame according to its header opcode.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownOpcode`] if the opcode is unrecognized
    /// - [`ProtocolError::CborDecode`] if deserialization fails
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;

        fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        let bytes = frame.payload.as_ref();

        match opcode {
            Opcode::Hello => Ok(Self::Hello(decode(bytes)?)),
            Opcode::HelloReply => Ok(Self::HelloReply(decode(bytes)?)),
            Opcode::Goodbye => Ok(Self::Goodbye(decode(bytes)?)),
            Opcode::Ping => Ok(Self::Ping),
            Opcode::Pong => Ok(Self::Pong),
            Opcode::Send => Ok(Self::Send(decode(bytes)?)),
            Opcode::ReadReceipt => Ok(Self::ReadReceipt),
            Opcode::Typing => Ok(Self::Typing(decode(bytes)?)),
            Opcode::StatusQuery => Ok(Self::StatusQuery),
            Opcode::History => Ok(Self::History(decode(bytes)?)),
            Opcode::MessageReceived => Ok(Self::MessageReceived(decode(bytes)?)),
            Opcode::SendAck => Ok(Self::SendAck(decode(bytes)?)),
            Opcode::UnreadCount => Ok(Self::UnreadCount(decode(bytes)?)),
            Opcode::Presence => Ok(Self::Presence(decode(bytes)?)),
            Opcode::StatusSnapshot => Ok(Self::StatusSnapshot(decode(bytes)?)),
            Opcode::MessagesRead => Ok(Self::MessagesRead(decode(bytes)?)),
            Opcode::HistoryReply => Ok(Self::HistoryReply(decode(bytes)?)),
            Opcode::Reject => Ok(Self::Reject(decode(bytes)?)),
        }
    }
}
