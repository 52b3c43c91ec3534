//! Bounded cache of skipped message keys.
//!
//! Stores message keys for out-of-order messages indexed by
//! `(ratchet_public_key, message_number)`. The cache holds at most
//! `max_keys` entries; inserting beyond that evicts the oldest entry, so an
//! adversarial gap cannot grow memory without bound.

use crate::crypto::SymmetricKey;
use crate::keys::PublicKey;
use std::collections::{HashMap, VecDeque};

type SlotId = (PublicKey, u32);

pub(crate) struct SkippedKeyCache {
    keys: HashMap<SlotId, SymmetricKey>,
    /// Insertion order. May hold ids already consumed; those are skipped on eviction.
    order: VecDeque<SlotId>,
    max_keys: usize,
}

impl SkippedKeyCache {
    pub(crate) fn new(max_keys: usize) -> Self {
        Self {
            keys: HashMap::new(),
            order: VecDeque::new(),
            max_keys,
        }
    }

    /// Stores a key, returning how many older keys were evicted to make room.
    pub(crate) fn insert(&mut self, ratchet_key: PublicKey, message_number: u32, key: SymmetricKey) -> usize {
        let slot = (ratchet_key, message_number);
        if self.keys.insert(slot, key).is_none() {
            self.order.push_back(slot);
        }

        let mut evicted = 0;
        while self.keys.len() > self.max_keys {
            match self.order.pop_front() {
                Some(oldest) => {
                    if self.keys.remove(&oldest).is_some() {
                        evicted += 1;
                    }
                }
                None => break,
            }
        }

        if self.order.len() > self.max_keys.saturating_mul(2) {
            let keys = &self.keys;
            self.order.retain(|slot| keys.contains_key(slot));
        }

        evicted
    }

    pub(crate) fn get(&self, ratchet_key: &PublicKey, message_number: u32) -> Option<&SymmetricKey> {
        self.keys.get(&(*ratchet_key, message_number))
    }

    /// Removes a key after it has been used. The dropped key is zeroized.
    pub(crate) fn remove(&mut self, ratchet_key: &PublicKey, message_number: u32) -> bool {
        self.keys.remove(&(*ratchet_key, message_number)).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}

impl std::fmt::Debug for SkippedKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedKeyCache")
            .field("len", &self.keys.len())
            .field("max_keys", &self.max_keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE_32;
    use crate::keys::SecretKey;
    use rand_core::OsRng;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::from_bytes([byte; KEY_SIZE_32])
    }

    #[test]
    fn test_insert_and_consume() {
        let mut cache = SkippedKeyCache::new(10);
        let ratchet = SecretKey::generate(&mut OsRng).public_key();

        cache.insert(ratchet, 5, key(42));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&ratchet, 5).unwrap().as_bytes(), &[42u8; KEY_SIZE_32]);

        assert!(cache.remove(&ratchet, 5));
        assert!(!cache.remove(&ratchet, 5));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut cache = SkippedKeyCache::new(2);
        let ratchet = SecretKey::generate(&mut OsRng).public_key();

        assert_eq!(cache.insert(ratchet, 1, key(1)), 0);
        assert_eq!(cache.insert(ratchet, 2, key(2)), 0);
        assert_eq!(cache.insert(ratchet, 3, key(3)), 1);

        assert!(cache.get(&ratchet, 1).is_none());
        assert!(cache.get(&ratchet, 2).is_some());
        assert!(cache.get(&ratchet, 3).is_some());
    }

    #[test]
    fn test_consumed_entries_not_counted_for_eviction() {
        let mut cache = SkippedKeyCache::new(2);
        let ratchet = SecretKey::generate(&mut OsRng).public_key();

        cache.insert(ratchet, 1, key(1));
        cache.insert(ratchet, 2, key(2));
        cache.remove(&ratchet, 1);

        assert_eq!(cache.insert(ratchet, 3, key(3)), 0);
        assert!(cache.get(&ratchet, 2).is_some());
    }

    #[test]
    fn test_order_queue_stays_bounded() {
        let mut cache = SkippedKeyCache::new(4);
        let ratchet = SecretKey::generate(&mut OsRng).public_key();

        for n in 0..100 {
            cache.insert(ratchet, n, key(1));
            cache.remove(&ratchet, n);
        }
        assert!(cache.order.len() <= 8);
        assert_eq!(cache.len(), 0);
    }
}
