//! Session registry: user identity to live connections.
//!
//! Source of truth for "is this user online." A user owns zero or more
//! sessions (multi-device), each with an outbound frame handle feeding that
//! connection's writer task. The map is sharded by user id, so traffic for
//! unrelated users never contends on a shared lock.
//!
//! The 0→1 and 1→0 session-count transitions are the only events the
//! presence layer cares about; [`SessionEdge`] reports them so callers can
//! skip fan-out for every intermediate connect/disconnect of a multi-device
//! user.

use std::collections::HashMap;

use dashmap::{DashMap, Entry};
use parley_proto::Frame;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// Outbound frame handle for one live session.
///
/// Cloning is cheap; the channel feeds the connection's writer task, which
/// owns the actual socket. Sends never block: the dispatcher uses
/// `try_send`, and a full or closed queue marks the session for teardown.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    /// Session this handle belongs to.
    pub session_id: u64,
    /// Queue into the session's writer task.
    pub sender: mpsc::Sender<Frame>,
}

impl OutboundHandle {
    /// Create a handle for a session's outbound queue.
    #[must_use]
    pub fn new(session_id: u64, sender: mpsc::Sender<Frame>) -> Self {
        Self { session_id, sender }
    }
}

/// Presence-relevant transition caused by a register or unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEdge {
    /// First session for the user: 0→1, the user went online.
    WentOnline,
    /// Last session for the user: 1→0, the user went offline.
    WentOffline,
    /// The user's online state did not change (other sessions remain).
    NoChange,
}

/// Result of unregistering a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedSession {
    /// User the session belonged to.
    pub user_id: u64,
    /// Presence edge the removal caused.
    pub edge: SessionEdge,
}

/// Registry of live sessions, sharded by user id.
///
/// # Invariants
///
/// - A session id maps to exactly one user for its whole lifetime.
/// - `is_online(u)` is true iff the user has at least one live session.
/// - Unregistering an unknown session is a no-op; the disconnect path and
///   the idle-timeout path may race and both try to remove the same session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// User id → that user's live sessions and their outbound handles.
    users: DashMap<u64, HashMap<u64, OutboundHandle>>,
    /// Session id → owning user id (reverse index for unregister).
    sessions: DashMap<u64, u64>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live session for an authenticated user.
    ///
    /// Returns [`SessionEdge::WentOnline`] when this is the user's first
    /// session, [`SessionEdge::NoChange`] otherwise.
    ///
    /// # Errors
    ///
    /// - [`RelayError::DuplicateSession`] if the session id is already
    ///   registered (for any user)
    pub fn register(
        &self,
        user_id: u64,
        session_id: u64,
        sender: mpsc::Sender<Frame>,
    ) -> Result<SessionEdge, RelayError> {
        match self.sessions.entry(session_id) {
            Entry::Occupied(_) => return Err(RelayError::DuplicateSession(session_id)),
            Entry::Vacant(vacant) => {
                vacant.insert(user_id);
            },
        }

        let mut sessions = self.users.entry(user_id).or_default();
        let went_online = sessions.is_empty();
        sessions.insert(session_id, OutboundHandle::new(session_id, sender));

        Ok(if went_online { SessionEdge::WentOnline } else { SessionEdge::NoChange })
    }

    /// Unregister a session.
    ///
    /// Unknown session ids return `None` without error; the explicit
    /// disconnect and the timeout reaper may both get here.
    pub fn unregister(&self, session_id: u64) -> Option<ClosedSession> {
        let (_, user_id) = self.sessions.remove(&session_id)?;

        let edge = match self.users.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().remove(&session_id);
                if occupied.get().is_empty() {
                    occupied.remove();
                    SessionEdge::WentOffline
                } else {
                    SessionEdge::NoChange
                }
            },
            // Reverse index pointed at a user with no session map; treat as
            // already gone.
            Entry::Vacant(_) => SessionEdge::WentOffline,
        };

        Some(ClosedSession { user_id, edge })
    }

    /// Outbound handles for all of a user's live sessions. Empty if offline.
    #[must_use]
    pub fn sessions_for(&self, user_id: u64) -> Vec<OutboundHandle> {
        self.users
            .get(&user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Outbound handle for one specific session. `None` if not registered.
    #[must_use]
    pub fn handle_for(&self, session_id: u64) -> Option<OutboundHandle> {
        let user_id = *self.sessions.get(&session_id)?;
        self.users.get(&user_id)?.get(&session_id).cloned()
    }

    /// Owning user of a session. `None` if not registered.
    #[must_use]
    pub fn user_for(&self, session_id: u64) -> Option<u64> {
        self.sessions.get(&session_id).map(|user| *user)
    }

    /// Whether the user has at least one live session.
    #[must_use]
    pub fn is_online(&self, user_id: u64) -> bool {
        self.users.get(&user_id).is_some_and(|sessions| !sessions.is_empty())
    }

    /// Total number of live sessions across all users.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> mpsc::Sender<Frame> {
        mpsc::channel(8).0
    }

    #[test]
    fn first_session_goes_online_last_goes_offline() {
        let registry = SessionRegistry::new();

        assert!(!registry.is_online(7));
        assert_eq!(registry.register(7, 100, handle()).unwrap(), SessionEdge::WentOnline);
        assert!(registry.is_online(7));

        // Second device: no presence edge
        assert_eq!(registry.register(7, 101, handle()).unwrap(), SessionEdge::NoChange);

        let closed = registry.unregister(100).unwrap();
        assert_eq!(closed, ClosedSession { user_id: 7, edge: SessionEdge::NoChange });
        assert!(registry.is_online(7));

        let closed = registry.unregister(101).unwrap();
        assert_eq!(closed, ClosedSession { user_id: 7, edge: SessionEdge::WentOffline });
        assert!(!registry.is_online(7));
    }

    #[test]
    fn duplicate_session_id_rejected() {
        let registry = SessionRegistry::new();

        registry.register(7, 100, handle()).unwrap();

        // Same id for the same user
        assert_eq!(
            registry.register(7, 100, handle()),
            Err(RelayError::DuplicateSession(100))
        );

        // Same id for a different user
        assert_eq!(
            registry.register(8, 100, handle()),
            Err(RelayError::DuplicateSession(100))
        );

        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn unregister_unknown_session_is_noop() {
        let registry = SessionRegistry::new();

        assert!(registry.unregister(999).is_none());

        registry.register(7, 100, handle()).unwrap();
        registry.unregister(100).unwrap();

        // Double unregister: the timeout/disconnect race
        assert!(registry.unregister(100).is_none());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn sessions_for_returns_all_devices() {
        let registry = SessionRegistry::new();

        registry.register(7, 100, handle()).unwrap();
        registry.register(7, 101, handle()).unwrap();
        registry.register(8, 200, handle()).unwrap();

        let mut ids: Vec<u64> =
            registry.sessions_for(7).iter().map(|h| h.session_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![100, 101]);

        assert!(registry.sessions_for(9).is_empty());
    }

    #[test]
    fn handle_and_user_lookup_by_session() {
        let registry = SessionRegistry::new();

        registry.register(7, 100, handle()).unwrap();

        assert_eq!(registry.handle_for(100).unwrap().session_id, 100);
        assert_eq!(registry.user_for(100), Some(7));
        assert!(registry.handle_for(999).is_none());
        assert_eq!(registry.user_for(999), None);
    }

    #[test]
    fn concurrent_registers_keep_counts_consistent() {
        use std::sync::Arc;

        let registry = Arc::new(SessionRegistry::new());
        let threads: Vec<_> = (0..8u64)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50u64 {
                        let session_id = t * 1000 + i;
                        registry.register(t % 4, session_id, handle()).unwrap();
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(registry.session_count(), 400);
        for user in 0..4 {
            assert!(registry.is_online(user));
            assert_eq!(registry.sessions_for(user).len(), 100);
        }
    }
}
