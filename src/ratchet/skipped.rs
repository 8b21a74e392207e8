use std::collections::{HashMap, VecDeque};
use zeroize::Zeroize;

type SkippedId = ([u8; 32], u32);

/// Message keys derived ahead of time for messages that have not arrived yet.
///
/// Keyed by the sender's ratchet public key and the message counter. Holds at
/// most `capacity` keys; inserting into a full cache drops the oldest insertion.
#[derive(Clone)]
pub(crate) struct SkippedKeys {
    keys: HashMap<SkippedId, Box<[u8; 32]>>,
    order: VecDeque<SkippedId>,
    capacity: usize,
}

impl SkippedKeys {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            keys: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Stores a key. Returns how many old keys were evicted to make room.
    pub(crate) fn insert(&mut self, ratchet_key: [u8; 32], counter: u32, message_key: Box<[u8; 32]>) -> usize {
        if self.capacity == 0 {
            return 0;
        }

        let id = (ratchet_key, counter);
        let mut evicted = 0;
        if self.keys.contains_key(&id) {
            self.order.retain(|existing| existing != &id);
        } else {
            while self.keys.len() >= self.capacity {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                if let Some(mut key) = self.keys.remove(&oldest) {
                    key.zeroize();
                    evicted += 1;
                }
            }
        }

        self.order.push_back(id);
        self.keys.insert(id, message_key);
        evicted
    }

    pub(crate) fn get(&self, ratchet_key: &[u8; 32], counter: u32) -> Option<&[u8; 32]> {
        self.keys.get(&(*ratchet_key, counter)).map(|key| key.as_ref())
    }

    pub(crate) fn remove(&mut self, ratchet_key: &[u8; 32], counter: u32) {
        let id = (*ratchet_key, counter);
        if let Some(mut key) = self.keys.remove(&id) {
            key.zeroize();
            self.order.retain(|existing| existing != &id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for SkippedKeys {
    fn drop(&mut self) {
        for key in self.keys.values_mut() {
            key.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut cache = SkippedKeys::new(4);
        cache.insert([1u8; 32], 3, Box::new([7u8; 32]));

        assert_eq!(cache.get(&[1u8; 32], 3), Some(&[7u8; 32]));
        assert_eq!(cache.get(&[2u8; 32], 3), None);

        cache.remove(&[1u8; 32], 3);
        assert_eq!(cache.get(&[1u8; 32], 3), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_oldest_entry_is_evicted_first() {
        let mut cache = SkippedKeys::new(2);
        assert_eq!(cache.insert([1u8; 32], 0, Box::new([0u8; 32])), 0);
        assert_eq!(cache.insert([1u8; 32], 1, Box::new([1u8; 32])), 0);
        assert_eq!(cache.insert([1u8; 32], 2, Box::new([2u8; 32])), 1);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[1u8; 32], 0).is_none());
        assert!(cache.get(&[1u8; 32], 1).is_some());
        assert!(cache.get(&[1u8; 32], 2).is_some());
    }

    #[test]
    fn test_removed_entries_do_not_count_against_capacity() {
        let mut cache = SkippedKeys::new(2);
        cache.insert([1u8; 32], 0, Box::new([0u8; 32]));
        cache.insert([1u8; 32], 1, Box::new([1u8; 32]));
        cache.remove(&[1u8; 32], 0);

        assert_eq!(cache.insert([1u8; 32], 2, Box::new([2u8; 32])), 0);
        assert_eq!(cache.insert([1u8; 32], 3, Box::new([3u8; 32])), 1);
        assert!(cache.get(&[1u8; 32], 1).is_none());
        assert!(cache.get(&[1u8; 32], 2).is_some());
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = SkippedKeys::new(0);
        cache.insert([1u8; 32], 0, Box::new([0u8; 32]));
        assert_eq!(cache.len(), 0);
    }
}
