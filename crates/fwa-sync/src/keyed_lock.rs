//! # Keyed Lock
//!
//! [`KeyedLock`] hands out exclusive access per key. Distinct keys never
//! contend; callers on the same key are fully serialized. Each key carries
//! a memo slot that lives inside the per-key lock: the first holder
//! computes a result and stores it, and every caller queued behind it
//! reads the memo instead of recomputing.
//!
//! ## Table Protocol
//!
//! The table maps key → `{refcount, per-key mutex}` and is guarded by one
//! coarse mutex held only for map operations.
//!
//! - **Acquire**: under the table lock, find-or-create the entry and
//!   increment its refcount; release the table lock; await the per-key
//!   mutex.
//! - **Release**: unlock the per-key mutex; under the table lock decrement
//!   the refcount and delete the entry at zero.
//!
//! An entry exists iff its refcount is positive, so the table is empty
//! once every guard (and every pending acquire) is gone. The memo is
//! dropped with the entry. A caller whose acquire future is dropped while
//! still queued gives its reference back.
//!
//! Finding an entry whose refcount is already zero means the table is
//! corrupted; that panics.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Entry<V> {
    refcount: usize,
    slot: Arc<AsyncMutex<Option<V>>>,
}

struct Table<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
}

/// Per-key exclusive lock with a memo slot of type `V`.
///
/// Cloning is cheap and shares the table.
pub struct KeyedLock<K, V> {
    table: Arc<Table<K, V>>,
}

impl<K, V> Clone for KeyedLock<K, V> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K, V> Default for KeyedLock<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyedLock<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            table: Arc::new(Table {
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancel-safe: dropping the returned future before it resolves
    /// releases the reference taken on the entry.
    pub async fn acquire(&self, key: K) -> KeyedLockGuard<K, V> {
        let slot = {
            let mut entries = self.table.entries.lock();
            match entries.get_mut(&key) {
                Some(entry) => {
                    assert!(
                        entry.refcount > 0,
                        "keyed lock: found entry with zero refcount"
                    );
                    entry.refcount += 1;
                    Arc::clone(&entry.slot)
                }
                None => {
                    let slot = Arc::new(AsyncMutex::new(None));
                    entries.insert(
                        key.clone(),
                        Entry {
                            refcount: 1,
                            slot: Arc::clone(&slot),
                        },
                    );
                    slot
                }
            }
        };

        let reference = Reference {
            table: Arc::clone(&self.table),
            key,
        };
        let held = slot.lock_owned().await;
        KeyedLockGuard { held, reference }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.table.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Holders plus waiters on `key`; zero when the key has no entry.
    pub fn refcount(&self, key: &K) -> usize {
        self.table
            .entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.refcount)
    }
}

/// One counted reference on a table entry. Dropping it decrements.
struct Reference<K: Eq + Hash, V> {
    table: Arc<Table<K, V>>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for Reference<K, V> {
    fn drop(&mut self) {
        let mut entries = self.table.entries.lock();
        let Some(entry) = entries.get_mut(&self.key) else {
            panic!("keyed lock: released key is missing from the table");
        };
        assert!(
            entry.refcount > 0,
            "keyed lock: release of entry with zero refcount"
        );
        entry.refcount -= 1;
        let remove = entry.refcount == 0;
        if remove {
            entries.remove(&self.key);
        }
    }
}

/// Exclusive access to one key, with its memo slot.
///
/// Field order matters: the per-key mutex unlocks before the table
/// reference is returned.
pub struct KeyedLockGuard<K: Eq + Hash, V> {
    held: OwnedMutexGuard<Option<V>>,
    reference: Reference<K, V>,
}

impl<K: Eq + Hash, V> KeyedLockGuard<K, V> {
    /// The key this guard holds.
    pub fn key(&self) -> &K {
        &self.reference.key
    }

    /// Result stored by an earlier holder of this key, if any.
    pub fn memo(&self) -> Option<&V> {
        self.held.as_ref()
    }

    /// Store a result for holders queued behind this one.
    pub fn set_memo(&mut self, value: V) {
        *self.held = Some(value);
    }

    /// Remove and return the memo.
    pub fn take_memo(&mut self) -> Option<V> {
        self.held.take()
    }

    /// Release the lock. Equivalent to dropping the guard.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let lock: KeyedLock<&str, ()> = KeyedLock::new();
        let _a = lock.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_secs(1), lock.acquire("b")).await;
        assert!(b.is_ok(), "acquire on a distinct key must not wait");
        assert_eq!(lock.len(), 2);
    }

    #[tokio::test]
    async fn test_same_key_waits_for_release() {
        let lock: KeyedLock<&str, ()> = KeyedLock::new();
        let a = lock.acquire("k").await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), lock.acquire("k")).await;
        assert!(blocked.is_err());
        a.release();
        let again = tokio::time::timeout(Duration::from_secs(1), lock.acquire("k")).await;
        assert!(again.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_under_contention() {
        let lock: KeyedLock<u32, ()> = KeyedLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let lock = lock.clone();
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _g = lock.acquire(7).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn test_memo_visible_to_queued_holder() {
        let lock: KeyedLock<&str, u64> = KeyedLock::new();
        let mut first = lock.acquire("k").await;
        assert!(first.memo().is_none());

        let lock2 = lock.clone();
        let waiter = tokio::spawn(async move {
            let g = lock2.acquire("k").await;
            g.memo().copied()
        });
        while lock.refcount(&"k") < 2 {
            tokio::task::yield_now().await;
        }

        first.set_memo(42);
        drop(first);
        assert_eq!(waiter.await.unwrap(), Some(42));
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn test_memo_dropped_with_entry() {
        let lock: KeyedLock<&str, u64> = KeyedLock::new();
        let mut g = lock.acquire("k").await;
        g.set_memo(1);
        drop(g);
        let g = lock.acquire("k").await;
        assert!(g.memo().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_returns_reference() {
        let lock: KeyedLock<&str, ()> = KeyedLock::new();
        let held = lock.acquire("k").await;
        let timed_out = tokio::time::timeout(Duration::from_millis(20), lock.acquire("k")).await;
        assert!(timed_out.is_err());
        assert_eq!(lock.len(), 1);
        drop(held);
        assert!(lock.is_empty(), "no entry may leak after a cancelled waiter");
    }
}
