//! Per-(user, conversation) unread counters.
//!
//! Counters are mutated by exactly two paths: the router increments on
//! delivery to a recipient with no live session, and read-receipt handling
//! resets to zero. Both serialize per key through the sharded map's entry
//! lock, so a concurrent increment and reset never lose an update; the map
//! never takes a lock spanning unrelated keys.

use std::collections::HashMap;

use dashmap::DashMap;

/// Unread counter store.
///
/// # Invariants
///
/// - Counters are never negative (unsigned, reset writes zero).
/// - A reset on an absent key creates the zero entry, so repeated resets
///   are idempotent and later snapshots report the conversation as read.
#[derive(Debug, Default)]
pub struct UnreadCounters {
    counters: DashMap<(u64, u128), u64>,
}

impl UnreadCounters {
    /// Create an empty store; every counter reads as zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for a pending message, returning the new count.
    pub fn increment(&self, user_id: u64, conversation_id: u128) -> u64 {
        let mut entry = self.counters.entry((user_id, conversation_id)).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Reset the counter to zero.
    ///
    /// Idempotent; an absent key gets a zero entry.
    pub fn reset(&self, user_id: u64, conversation_id: u128) {
        *self.counters.entry((user_id, conversation_id)).or_insert(0) = 0;
    }

    /// Current count for one key. Absent keys read as zero.
    #[must_use]
    pub fn count(&self, user_id: u64, conversation_id: u128) -> u64 {
        self.counters.get(&(user_id, conversation_id)).map_or(0, |count| *count)
    }

    /// All of a user's counters, keyed by conversation.
    ///
    /// Scans the whole map; meant for session-open sync, not hot paths.
    #[must_use]
    pub fn snapshot(&self, user_id: u64) -> HashMap<u128, u64> {
        self.counters
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| (entry.key().1, *entry.value()))
            .collect()
    }
}
