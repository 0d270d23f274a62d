//! Exact recency index shared by the caches.
//!
//! Every touch assigns a fresh monotonic tick; the smallest tick in
//! `order` is the least recently used key.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

pub(crate) struct LruIndex<K> {
    ticks: HashMap<K, u64>,
    order: BTreeMap<u64, K>,
    next: u64,
}

impl<K: Eq + Hash + Clone> LruIndex<K> {
    pub(crate) fn new() -> Self {
        Self {
            ticks: HashMap::new(),
            order: BTreeMap::new(),
            next: 0,
        }
    }

    /// Mark `key` most recently used, inserting it if absent.
    pub(crate) fn touch(&mut self, key: &K) {
        if let Some(old) = self.ticks.get(key) {
            self.order.remove(old);
        }
        let tick = self.next;
        self.next += 1;
        self.ticks.insert(key.clone(), tick);
        self.order.insert(tick, key.clone());
    }

    pub(crate) fn remove(&mut self, key: &K) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    /// Remove and return the least recently used key.
    pub(crate) fn pop_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.ticks.len()
    }

    pub(crate) fn clear(&mut self) {
        self.ticks.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_reorders() {
        let mut lru = LruIndex::new();
        lru.touch(&"a");
        lru.touch(&"b");
        lru.touch(&"a");
        assert_eq!(lru.pop_oldest(), Some("b"));
        assert_eq!(lru.pop_oldest(), Some("a"));
        assert_eq!(lru.pop_oldest(), None);
    }

    #[test]
    fn test_remove() {
        let mut lru = LruIndex::new();
        lru.touch(&1);
        lru.touch(&2);
        lru.remove(&1);
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.pop_oldest(), Some(2));
    }
}
