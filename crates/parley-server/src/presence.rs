//! Presence tracker: derived online/offline/typing state per user.
//!
//! Presence is a latest-wins read model, not an event log. Each user gets a
//! single-slot `watch` channel: publishing overwrites the previous value, a
//! slow subscriber misses intermediate states but always observes the most
//! recent one, and memory stays bounded no matter how far behind a
//! subscriber falls.
//!
//! Only the registry's 0→1 and 1→0 session edges reach this layer; typing
//! is an advisory signal layered on top of "online" and cleared by any
//! subsequent transition.

use dashmap::DashMap;
use parley_proto::payloads::chat::PresenceStatus;
use tokio::sync::watch;

/// A user's visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// No live sessions. `last_seen_ms` is the wall-clock time of the last
    /// offline transition, `None` for users never seen online.
    Offline {
        /// When the user last went offline, in unix milliseconds.
        last_seen_ms: Option<u64>,
    },
    /// At least one live session.
    Online,
    /// Online and typing in a conversation. Valid only until superseded or
    /// the user goes offline.
    Typing {
        /// Conversation being typed in.
        conversation_id: u128,
    },
}

impl PresenceState {
    /// Wire representation: status plus the optional last-seen stamp.
    #[must_use]
    pub fn as_wire(&self) -> (PresenceStatus, Option<u64>) {
        match *self {
            Self::Offline { last_seen_ms } => (PresenceStatus::Offline, last_seen_ms),
            Self::Online => (PresenceStatus::Online, None),
            Self::Typing { conversation_id } => {
                (PresenceStatus::Typing { conversation_id }, None)
            },
        }
    }

    /// Whether the user currently has a live session.
    #[must_use]
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Offline { .. })
    }
}

/// Per-user presence state with latest-wins fan-out.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// User id → single-slot publisher. The sender doubles as the stored
    /// current state via [`watch::Sender::borrow`].
    slots: DashMap<u64, watch::Sender<PresenceState>>,
}

impl PresenceTracker {
    /// Create a tracker with every user offline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a registry session edge.
    ///
    /// `went_online` distinguishes the 0→1 edge from the 1→0 edge;
    /// intermediate connects and disconnects of a multi-device user never
    /// reach this method. Offline transitions stamp the last-seen clock.
    pub fn on_session_edge(&self, user_id: u64, went_online: bool, now_ms: u64) {
        let state = if went_online {
            PresenceState::Online
        } else {
            PresenceState::Offline { last_seen_ms: Some(now_ms) }
        };

        self.publish(user_id, state);
    }

    /// Record an advisory typing signal.
    ///
    /// Returns `false` (signal dropped, not an error) when the user is
    /// offline; typing requires a live session. `active: false` reverts the
    /// user to plain online.
    pub fn set_typing(&self, user_id: u64, conversation_id: u128, active: bool) -> bool {
        let Some(slot) = self.slots.get(&user_id) else {
            return false;
        };

        if !slot.borrow().is_online() {
            return false;
        }

        let state = if active {
            PresenceState::Typing { conversation_id }
        } else {
            PresenceState::Online
        };
        slot.send_replace(state);

        true
    }

    /// Current state of a user. Users never seen are offline.
    #[must_use]
    pub fn status(&self, user_id: u64) -> PresenceState {
        self.slots
            .get(&user_id)
            .map_or(PresenceState::Offline { last_seen_ms: None }, |slot| *slot.borrow())
    }

    /// Subscribe to a user's presence.
    ///
    /// The receiver observes the current state immediately and every state
    /// that is latest at the time it polls; intermediate states may be
    /// skipped. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self, user_id: u64) -> watch::Receiver<PresenceState> {
        self.slots
            .entry(user_id)
            .or_insert_with(|| watch::channel(PresenceState::Offline { last_seen_ms: None }).0)
            .subscribe()
    }

    fn publish(&self, user_id: u64, state: PresenceState) {
        self.slots
            .entry(user_id)
            .or_insert_with(|| watch::channel(PresenceState::Offline { last_seen_ms: None }).0)
            .send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_is_offline() {
        let tracker = PresenceTracker::new();
        assert_eq!(tracker.status(7), PresenceState::Offline { last_seen_ms: None });
    }

    #[test]
    fn session_edges_drive_online_offline() {
        let tracker = PresenceTracker::new();

        tracker.on_session_edge(7, true, 1_000);
        assert_eq!(tracker.status(7), PresenceState::Online);

        tracker.on_session_edge(7, false, 2_000);
        assert_eq!(tracker.status(7), PresenceState::Offline { last_seen_ms: Some(2_000) });
    }

    #[test]
    fn typing_requires_live_session() {
        let tracker = PresenceTracker::new();

        // Offline: dropped silently
        assert!(!tracker.set_typing(7, 99, true));
        assert_eq!(tracker.status(7), PresenceState::Offline { last_seen_ms: None });

        tracker.on_session_edge(7, true, 1_000);
        assert!(tracker.set_typing(7, 99, true));
        assert_eq!(tracker.status(7), PresenceState::Typing { conversation_id: 99 });

        // Stop typing reverts to online
        assert!(tracker.set_typing(7, 99, false));
        assert_eq!(tracker.status(7), PresenceState::Online);
    }

    #[test]
    fn going_offline_clears_typing() {
        let tracker = PresenceTracker::new();

        tracker.on_session_edge(7, true, 1_000);
        tracker.set_typing(7, 99, true);

        tracker.on_session_edge(7, false, 2_000);
        assert_eq!(tracker.status(7), PresenceState::Offline { last_seen_ms: Some(2_000) });

        // Typing while offline stays dropped even though a slot exists
        assert!(!tracker.set_typing(7, 99, true));
    }

    #[test]
    fn subscriber_sees_latest_state_only() {
        let tracker = PresenceTracker::new();
        let mut rx = tracker.subscribe(7);

        assert_eq!(*rx.borrow_and_update(), PresenceState::Offline { last_seen_ms: None });

        // Three rapid transitions; a subscriber that polls once sees only
        // the last
        tracker.on_session_edge(7, true, 1_000);
        tracker.set_typing(7, 99, true);
        tracker.on_session_edge(7, false, 3_000);

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), PresenceState::Offline { last_seen_ms: Some(3_000) });
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn late_subscriber_observes_current_state() {
        let tracker = PresenceTracker::new();

        tracker.on_session_edge(7, true, 1_000);

        let rx = tracker.subscribe(7);
        assert_eq!(*rx.borrow(), PresenceState::Online);
    }

    #[test]
    fn wire_mapping_carries_last_seen() {
        let offline = PresenceState::Offline { last_seen_ms: Some(42) };
        assert_eq!(offline.as_wire(), (PresenceStatus::Offline, Some(42)));

        let typing = PresenceState::Typing { conversation_id: 5 };
        assert_eq!(typing.as_wire(), (PresenceStatus::Typing { conversation_id: 5 }, None));
    }
}
