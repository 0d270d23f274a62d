//! # Outcome Cache
//!
//! Keeps the outcome of a keyed computation after the keyed lock entry
//! that produced it is gone. Successes live in an LRU bounded by entry
//! count and by the summed cost the caller assigns each value (the image
//! size, for firmware handles). Failures live in a separate negative cache and expire after a
//! short TTL, so a transient failure is replayed to immediate retries but
//! never pinned for the lifetime of the process.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::lru::LruIndex;

/// A cached outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached<V, E> {
    Hit(V),
    Failed(E),
}

struct Inner<K, V, E> {
    ok: HashMap<K, (V, u64)>,
    lru: LruIndex<K>,
    used: u64,
    failed: HashMap<K, (E, Instant)>,
}

/// Success LRU plus TTL-bounded negative cache.
pub struct OutcomeCache<K, V, E> {
    capacity: usize,
    cost_limit: u64,
    negative_ttl: Duration,
    inner: Mutex<Inner<K, V, E>>,
}

impl<K, V, E> OutcomeCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// `capacity` and `cost_limit` bound successes; `negative_ttl` bounds
    /// how long a failure is replayed.
    pub fn new(capacity: usize, cost_limit: u64, negative_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            cost_limit,
            negative_ttl,
            inner: Mutex::new(Inner {
                ok: HashMap::new(),
                lru: LruIndex::new(),
                used: 0,
                failed: HashMap::new(),
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<Cached<V, E>> {
        let mut inner = self.inner.lock();
        if let Some((v, _)) = inner.ok.get(key).cloned() {
            inner.lru.touch(key);
            return Some(Cached::Hit(v));
        }
        let fresh = match inner.failed.get(key) {
            Some((err, at)) if at.elapsed() <= self.negative_ttl => Some(err.clone()),
            Some(_) => None,
            None => return None,
        };
        match fresh {
            Some(err) => Some(Cached::Failed(err)),
            None => {
                inner.failed.remove(key);
                None
            }
        }
    }

    /// Record a success costing `cost`, superseding any cached failure.
    /// A value costing more than the whole limit is not kept. Returns
    /// whether it was.
    pub fn insert_ok(&self, key: K, value: V, cost: u64) -> bool {
        let mut inner = self.inner.lock();
        inner.failed.remove(&key);
        if let Some((_, old)) = inner.ok.remove(&key) {
            inner.used -= old;
            inner.lru.remove(&key);
        }
        if cost > self.cost_limit {
            return false;
        }
        inner.lru.touch(&key);
        inner.ok.insert(key, (value, cost));
        inner.used += cost;
        while inner.ok.len() > self.capacity || inner.used > self.cost_limit {
            let Some(victim) = inner.lru.pop_oldest() else {
                break;
            };
            if let Some((_, freed)) = inner.ok.remove(&victim) {
                inner.used -= freed;
            }
        }
        true
    }

    /// Record a failure. Existing successes for the key are left alone.
    pub fn insert_err(&self, key: K, err: E) {
        let mut inner = self.inner.lock();
        if inner.ok.contains_key(&key) {
            return;
        }
        let ttl = self.negative_ttl;
        inner.failed.retain(|_, (_, at)| at.elapsed() <= ttl);
        inner.failed.insert(key, (err, Instant::now()));
    }

    /// Forget both outcomes for `key`.
    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock();
        if let Some((_, cost)) = inner.ok.remove(key) {
            inner.used -= cost;
        }
        inner.lru.remove(key);
        inner.failed.remove(key);
    }

    /// Cached successes.
    pub fn len(&self) -> usize {
        self.inner.lock().ok.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed cost of cached successes.
    pub fn used(&self) -> u64 {
        self.inner.lock().used
    }
}
