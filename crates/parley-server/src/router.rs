//! Message router: the frame-level state machine of the relay.
//!
//! The router itself is stateless; all state lives in the shared entities
//! (registry, presence, counters, participant cache, store). Every method
//! takes `&self` and is safe to call from arbitrarily many connection tasks
//! at once. Store calls are the only potentially slow operations and no
//! in-memory lock is ever held across one; outbound delivery is a
//! non-blocking queue push.
//!
//! Ordering: each connection task calls the router once per inbound frame,
//! in stream order, so a sender's frames for a conversation are persisted
//! and fanned out in the order sent on that connection. No order is defined
//! across different senders.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use parley_core::env::Environment;
use parley_proto::{
    Frame, FrameHeader, Payload,
    payloads::chat::{
        HistoryMessage, HistoryReply, MessageDelivery, MessagesRead, PartnerStatus,
        PresenceUpdate, SendAck, StatusSnapshot, UnreadCountUpdate,
    },
};

use crate::{
    dispatch::Dispatcher,
    error::RelayError,
    participants::ParticipantCache,
    presence::PresenceTracker,
    registry::{SessionEdge, SessionRegistry},
    store::{ChatStore, StoreError},
    unread::UnreadCounters,
};

/// Largest history page a single request may return.
const MAX_HISTORY_PAGE: usize = 100;

/// Stateless router over the shared relay entities.
pub struct Router<S, E>
where
    S: ChatStore,
    E: Environment,
{
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceTracker>,
    unread: Arc<UnreadCounters>,
    participants: ParticipantCache<S>,
    store: S,
    dispatcher: Dispatcher,
    env: E,
}

impl<S, E> Router<S, E>
where
    S: ChatStore,
    E: Environment,
{
    /// Wire a router over the shared entities.
    pub fn new(
        registry: Arc<SessionRegistry>,
        presence: Arc<PresenceTracker>,
        unread: Arc<UnreadCounters>,
        store: S,
        dispatcher: Dispatcher,
        env: E,
    ) -> Self {
        Self {
            registry,
            presence,
            unread,
            participants: ParticipantCache::new(store.clone()),
            store,
            dispatcher,
            env,
        }
    }

    /// Route one decoded inbound frame from an authenticated session.
    ///
    /// `user_id` is the session's authenticated identity; the header's
    /// sender field is never trusted on inbound frames.
    ///
    /// # Errors
    ///
    /// - [`RelayError`] describing the rejection to report back on the
    ///   originating connection
    pub fn handle_payload(
        &self,
        user_id: u64,
        session_id: u64,
        header: &FrameHeader,
        payload: Payload,
    ) -> Result<(), RelayError> {
        let conversation_id = header.conversation_id();
        let request_id = header.request_id();

        match payload {
            Payload::Send(send) => {
                self.handle_send(user_id, conversation_id, request_id, &send.content)
            },
            Payload::ReadReceipt => self.handle_read_receipt(user_id, conversation_id),
            Payload::Typing(typing) => {
                self.handle_typing(user_id, conversation_id, typing.active)
            },
            Payload::StatusQuery => self.handle_status_query(user_id, session_id, request_id),
            Payload::History(history) => self.handle_history(
                user_id,
                session_id,
                conversation_id,
                request_id,
                history.before_message_id,
                history.limit,
            ),
            other => Err(RelayError::UnexpectedFrame(other.opcode().to_u16())),
        }
    }

    /// Persist and fan out a message.
    ///
    /// The message is only considered sent once persistence succeeds; a
    /// store failure reaches no recipient. Each other participant either
    /// receives the frame on a live session or has their unread counter
    /// incremented, never both. Every one of the sender's own sessions gets
    /// a [`SendAck`] so multi-device state converges.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Forbidden`] if the sender is not a participant
    /// - [`RelayError::NotFound`] for an unknown conversation
    /// - [`RelayError::Persistence`] if the store rejected the write
    pub fn handle_send(
        &self,
        sender_id: u64,
        conversation_id: u128,
        request_id: u32,
        content: &str,
    ) -> Result<(), RelayError> {
        let participants = self.authorized_participants(conversation_id, sender_id)?;

        let message = self.store.create_message(
            conversation_id,
            sender_id,
            content,
            self.env.wall_clock_ms(),
        )?;

        let delivery = self.outbound(
            Payload::MessageReceived(MessageDelivery {
                message_id: message.message_id,
                conversation_id,
                sender_id,
                content: message.content.clone(),
                created_at_ms: message.created_at_ms,
            }),
            conversation_id,
            sender_id,
            0,
        );

        for &recipient in participants.iter().filter(|&&p| p != sender_id) {
            let reached = delivery
                .as_ref()
                .map_or(0, |frame| self.dispatcher.push(&self.registry, recipient, frame));

            // No live session took the frame: the message is pending for
            // this recipient until an explicit read receipt.
            if reached == 0 {
                let count = self.unread.increment(recipient, conversation_id);
                tracing::debug!(recipient, conversation_id, count, "queued unread");
            }
        }

        if let Some(ack) = self.outbound(
            Payload::SendAck(SendAck {
                message_id: message.message_id,
                conversation_id,
                created_at_ms: message.created_at_ms,
            }),
            conversation_id,
            sender_id,
            request_id,
        ) {
            self.dispatcher.push(&self.registry, sender_id, &ack);
        }

        Ok(())
    }

    /// Mark a conversation read up to now.
    ///
    /// Idempotent: marking already-seen messages and resetting a zero
    /// counter are both no-ops, so duplicate receipts converge on the same
    /// state.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Forbidden`] if the reader is not a participant
    /// - [`RelayError::NotFound`] for an unknown conversation
    /// - [`RelayError::Persistence`] if the store failed
    pub fn handle_read_receipt(
        &self,
        reader_id: u64,
        conversation_id: u128,
    ) -> Result<(), RelayError> {
        let participants = self.authorized_participants(conversation_id, reader_id)?;

        for message_id in self.store.unseen_by(conversation_id, reader_id)? {
            self.store.mark_seen(message_id, reader_id)?;
        }

        self.unread.reset(reader_id, conversation_id);

        if let Some(frame) = self.outbound(
            Payload::MessagesRead(MessagesRead { conversation_id, reader_id }),
            conversation_id,
            reader_id,
            0,
        ) {
            for &participant in participants.iter().filter(|&&p| p != reader_id) {
                self.dispatcher.push(&self.registry, participant, &frame);
            }
        }

        // The reader's other devices drop their badge too
        if let Some(frame) = self.outbound(
            Payload::UnreadCount(UnreadCountUpdate { conversation_id, count: 0 }),
            conversation_id,
            reader_id,
            0,
        ) {
            self.dispatcher.push(&self.registry, reader_id, &frame);
        }

        Ok(())
    }

    /// Relay an advisory typing signal to the other participants.
    ///
    /// Never blocks or affects delivery; a typing signal for an offline
    /// user is dropped silently.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Forbidden`] if the user is not a participant
    /// - [`RelayError::NotFound`] for an unknown conversation
    pub fn handle_typing(
        &self,
        user_id: u64,
        conversation_id: u128,
        active: bool,
    ) -> Result<(), RelayError> {
        let participants = self.authorized_participants(conversation_id, user_id)?;

        if !self.presence.set_typing(user_id, conversation_id, active) {
            return Ok(());
        }

        let (status, last_seen_ms) = self.presence.status(user_id).as_wire();
        if let Some(frame) = self.outbound(
            Payload::Presence(PresenceUpdate { user_id, status, last_seen_ms }),
            conversation_id,
            user_id,
            0,
        ) {
            for &participant in participants.iter().filter(|&&p| p != user_id) {
                self.dispatcher.push(&self.registry, participant, &frame);
            }
        }

        Ok(())
    }

    /// Answer a batch presence query with one snapshot frame.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Persistence`] if the store cannot list conversations
    pub fn handle_status_query(
        &self,
        user_id: u64,
        session_id: u64,
        request_id: u32,
    ) -> Result<(), RelayError> {
        let snapshot = self.status_snapshot(user_id)?;

        if let Some(frame) =
            self.outbound(Payload::StatusSnapshot(snapshot), 0, user_id, request_id)
        {
            self.dispatcher.push_to_session(&self.registry, session_id, frame);
        }

        Ok(())
    }

    /// Answer a reverse-paginated history request.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Forbidden`] if the requester is not a participant
    /// - [`RelayError::NotFound`] for an unknown conversation
    pub fn handle_history(
        &self,
        user_id: u64,
        session_id: u64,
        conversation_id: u128,
        request_id: u32,
        before_message_id: Option<u64>,
        limit: u16,
    ) -> Result<(), RelayError> {
        self.authorized_participants(conversation_id, user_id)?;

        let limit = usize::from(limit).clamp(1, MAX_HISTORY_PAGE);
        let page = self.store.list_before(conversation_id, before_message_id, limit)?;

        let messages = page
            .messages
            .into_iter()
            .map(|message| {
                let mut seen_by: Vec<u64> = message.seen_by.into_iter().collect();
                seen_by.sort_unstable();
                HistoryMessage {
                    message_id: message.message_id,
                    sender_id: message.sender_id,
                    content: message.content,
                    created_at_ms: message.created_at_ms,
                    seen_by,
                }
            })
            .collect();

        if let Some(frame) = self.outbound(
            Payload::HistoryReply(HistoryReply { messages, has_more: page.has_more }),
            conversation_id,
            user_id,
            request_id,
        ) {
            self.dispatcher.push_to_session(&self.registry, session_id, frame);
        }

        Ok(())
    }

    /// Hook for a session that just completed its handshake and registered.
    ///
    /// Fans the online edge out to conversation partners (first session
    /// only) and pushes the initial sync - presence snapshot plus pending
    /// unread counts - to the new session. Unread counters are untouched:
    /// coming online alone reads nothing.
    pub fn on_session_open(&self, user_id: u64, session_id: u64, edge: SessionEdge) {
        if edge == SessionEdge::WentOnline {
            self.presence.on_session_edge(user_id, true, self.env.wall_clock_ms());
            self.broadcast_presence(user_id);
        }

        match self.status_snapshot(user_id) {
            Ok(snapshot) => {
                if let Some(frame) =
                    self.outbound(Payload::StatusSnapshot(snapshot), 0, user_id, 0)
                {
                    self.dispatcher.push_to_session(&self.registry, session_id, frame);
                }
            },
            Err(err) => {
                tracing::warn!(user_id, error = %err, "initial presence sync failed");
            },
        }

        let mut counts: Vec<(u128, u64)> = self
            .unread
            .snapshot(user_id)
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .collect();
        counts.sort_unstable();

        for (conversation_id, count) in counts {
            if let Some(frame) = self.outbound(
                Payload::UnreadCount(UnreadCountUpdate { conversation_id, count }),
                conversation_id,
                user_id,
                0,
            ) {
                self.dispatcher.push_to_session(&self.registry, session_id, frame);
            }
        }
    }

    /// Hook for a session that disconnected, timed out, or was reaped.
    ///
    /// Unregisters the session and, on the user's last session, fans the
    /// offline edge (with last-seen stamp) out to partners. Safe to call
    /// multiple times for the same session; the registry swallows the race.
    pub fn on_session_closed(&self, session_id: u64) {
        let Some(closed) = self.registry.unregister(session_id) else {
            return;
        };

        tracing::debug!(session_id, user_id = closed.user_id, "session closed");

        if closed.edge == SessionEdge::WentOffline {
            self.presence.on_session_edge(closed.user_id, false, self.env.wall_clock_ms());
            self.broadcast_presence(closed.user_id);
        }
    }

    /// Participant set with an authorization check for `user_id`.
    fn authorized_participants(
        &self,
        conversation_id: u128,
        user_id: u64,
    ) -> Result<Arc<HashSet<u64>>, RelayError> {
        let participants = self.participants.get(conversation_id)?;

        if !participants.contains(&user_id) {
            return Err(RelayError::Forbidden { user_id, conversation_id });
        }

        Ok(participants)
    }

    /// Presence of every conversation partner, one entry per distinct user.
    fn status_snapshot(&self, user_id: u64) -> Result<StatusSnapshot, RelayError> {
        let partners = self
            .partners_of(user_id)?
            .into_iter()
            .map(|partner| {
                let (status, last_seen_ms) = self.presence.status(partner).as_wire();
                PartnerStatus { user_id: partner, status, last_seen_ms }
            })
            .collect();

        Ok(StatusSnapshot { partners })
    }

    /// Distinct users sharing at least one conversation with `user_id`.
    fn partners_of(&self, user_id: u64) -> Result<BTreeSet<u64>, StoreError> {
        let mut partners = BTreeSet::new();

        for conversation_id in self.store.conversations_for(user_id)? {
            // A conversation listed for the user but missing from the store
            // was deleted in between; skip it rather than fail the batch.
            if let Ok(participants) = self.participants.get(conversation_id) {
                partners.extend(participants.iter().copied().filter(|&p| p != user_id));
            }
        }

        Ok(partners)
    }

    /// Push the user's current presence to all conversation partners.
    fn broadcast_presence(&self, user_id: u64) {
        let (status, last_seen_ms) = self.presence.status(user_id).as_wire();

        let Some(frame) = self.outbound(
            Payload::Presence(PresenceUpdate { user_id, status, last_seen_ms }),
            0,
            user_id,
            0,
        ) else {
            return;
        };

        match self.partners_of(user_id) {
            Ok(partners) => {
                for partner in partners {
                    self.dispatcher.push(&self.registry, partner, &frame);
                }
            },
            Err(err) => {
                tracing::warn!(user_id, error = %err, "presence fan-out skipped");
            },
        }
    }

    /// Build an outbound frame with server-stamped routing fields.
    ///
    /// Encoding our own payload types cannot realistically fail; if it ever
    /// does the frame is dropped and logged rather than poisoning the
    /// caller's control flow.
    fn outbound(
        &self,
        payload: Payload,
        conversation_id: u128,
        sender_id: u64,
        request_id: u32,
    ) -> Option<Frame> {
        let mut header = FrameHeader::new(payload.opcode());
        header.set_conversation_id(conversation_id);
        header.set_sender_id(sender_id);
        header.set_request_id(request_id);
        header.set_timestamp_ms(self.env.wall_clock_ms());

        match payload.into_frame(header) {
            Ok(frame) => Some(frame),
            Err(err) => {
                tracing::error!(error = %err, "outbound frame encoding failed");
                None
            },
        }
    }
}
