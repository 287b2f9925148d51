//! Chat payload types: sends, receipts, presence, and history.
//!
//! Conversation scope and request correlation live in the frame header;
//! delivery payloads additionally repeat the routing fields clients need to
//! render a message without consulting the header.

use serde::{Deserialize, Serialize};

/// Send a message to the conversation named in the frame header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Message body. The relay treats content as opaque text.
    pub content: String,
}

/// Advisory typing indicator for the conversation in the frame header.
///
/// Never blocks delivery; dropped silently when the user is offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    /// True when typing starts, false when it stops.
    pub active: bool,
}

/// Reverse-paginated history request for the conversation in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Return messages strictly older than this message id. `None` starts
    /// from the newest message.
    pub before_message_id: Option<u64>,

    /// Maximum number of messages to return.
    pub limit: u16,
}

/// A message delivered to a recipient's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelivery {
    /// Store-assigned message identifier.
    pub message_id: u64,
    /// Conversation the message belongs to.
    pub conversation_id: u128,
    /// Authoring user.
    pub sender_id: u64,
    /// Message body.
    pub content: String,
    /// Persistence timestamp in unix milliseconds.
    pub created_at_ms: u64,
}

/// Acknowledgement that a sent message was persisted.
///
/// Delivered to every one of the sender's sessions so multi-device state
/// stays in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// Store-assigned identifier of the persisted message.
    pub message_id: u64,
    /// Conversation the message belongs to.
    pub conversation_id: u128,
    /// Persistence timestamp in unix milliseconds.
    pub created_at_ms: u64,
}

/// Updated unread counter for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCountUpdate {
    /// Conversation the counter belongs to.
    pub conversation_id: u128,
    /// Current pending-message count.
    pub count: u64,
}

/// A user's visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceStatus {
    /// No live sessions.
    Offline,
    /// At least one live session.
    Online,
    /// Online and typing in the given conversation.
    Typing {
        /// Conversation being typed in.
        conversation_id: u128,
    },
}

/// Presence transition for a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// User whose state changed.
    pub user_id: u64,
    /// New state.
    pub status: PresenceStatus,
    /// When the user was last seen, in unix milliseconds. Populated on
    /// offline transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<u64>,
}

/// Presence of one conversation partner within a [`StatusSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerStatus {
    /// Partner user id.
    pub user_id: u64,
    /// Partner's current state.
    pub status: PresenceStatus,
    /// When the partner was last seen, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<u64>,
}

/// Batch presence reply covering every conversation partner of the
/// requester. Answers a status query in one frame instead of N.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// One entry per distinct partner.
    pub partners: Vec<PartnerStatus>,
}

/// Notification that another participant read the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesRead {
    /// Conversation that was read.
    pub conversation_id: u128,
    /// User who read it.
    pub reader_id: u64,
}

/// One message within a [`HistoryReply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Store-assigned message identifier.
    pub message_id: u64,
    /// Authoring user.
    pub sender_id: u64,
    /// Message body.
    pub content: String,
    /// Persistence timestamp in unix milliseconds.
    pub created_at_ms: u64,
    /// Users who have seen this message.
    pub seen_by: Vec<u64>,
}

/// Page of message history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryReply {
    /// Messages in reverse canonical order (newest first).
    pub messages: Vec<HistoryMessage>,
    /// True if older messages remain beyond this page.
    pub has_more: bool,
}
