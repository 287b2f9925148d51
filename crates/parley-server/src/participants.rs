//! Read-through cache of conversation participant sets.
//!
//! The router consults the participant set on every Send, ReadReceipt, and
//! Typing frame; fetching it from the store each time would put a store
//! round trip on the hot path. Participant sets change rarely (conversation
//! membership is owned by an external collaborator), so a read-through
//! cache with explicit invalidation is enough.
//!
//! The cache lock is never held across the store call: a miss releases the
//! shard, queries the store, then inserts. Racing misses both query and one
//! insert wins, which is harmless for immutable-ish data.

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;

use crate::store::{ChatStore, StoreError};

/// Cached participant sets, keyed by conversation.
#[derive(Debug)]
pub struct ParticipantCache<S> {
    store: S,
    cache: DashMap<u128, Arc<HashSet<u64>>>,
}

impl<S: ChatStore> ParticipantCache<S> {
    /// Create an empty cache in front of the store.
    pub fn new(store: S) -> Self {
        Self { store, cache: DashMap::new() }
    }

    /// Participant set of a conversation, from cache or store.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConversationNotFound`] for an unknown conversation
    ///   (never cached; the conversation may be created later)
    pub fn get(&self, conversation_id: u128) -> Result<Arc<HashSet<u64>>, StoreError> {
        if let Some(cached) = self.cache.get(&conversation_id) {
            return Ok(Arc::clone(&cached));
        }

        let participants = Arc::new(self.store.list_participants(conversation_id)?);
        self.cache.insert(conversation_id, Arc::clone(&participants));

        Ok(participants)
    }

    /// Drop a cached entry, forcing the next lookup through to the store.
    ///
    /// Called when a collaborator signals a membership change.
    pub fn invalidate(&self, conversation_id: u128) {
        self.cache.remove(&conversation_id);
    }

    /// Number of cached conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn miss_reads_through_then_serves_from_cache() {
        let store = MemoryStore::new();
        let conversation = store.add_conversation(&[1, 2, 3]);

        let cache = ParticipantCache::new(store);
        assert!(cache.is_empty());

        let participants = cache.get(conversation).unwrap();
        assert_eq!(participants.len(), 3);
        assert_eq!(cache.len(), 1);

        // Second read hits the cache and returns the same set
        let again = cache.get(conversation).unwrap();
        assert!(Arc::ptr_eq(&participants, &again));
    }

    #[test]
    fn unknown_conversation_is_not_cached() {
        let cache = ParticipantCache::new(MemoryStore::new());

        assert!(matches!(
            cache.get(999),
            Err(StoreError::ConversationNotFound(999))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_forces_store_reread() {
        let store = MemoryStore::new();
        let conversation = store.add_conversation(&[1, 2]);

        let cache = ParticipantCache::new(store);
        let first = cache.get(conversation).unwrap();

        cache.invalidate(conversation);
        assert!(cache.is_empty());

        let second = cache.get(conversation).unwrap();
        assert_eq!(*first, *second);
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
