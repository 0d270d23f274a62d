//! # Content Cache
//!
//! In-process cache of immutable blobs keyed by their store path. Entries
//! are charged their byte cost; when the total exceeds the memory limit
//! the least recently used entries are evicted until the new one fits.
//!
//! ## Limits
//!
//! - Items whose cost exceeds the per-item ceiling (64 MiB by default) are
//!   refused, as are items larger than the whole budget.
//! - With a TTL configured, an entry older than the TTL reads as a miss and
//!   is dropped on that read.
//!
//! Blobs are shared as `Arc<[u8]>`, so a hit never copies the bytes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fwa_core::config::CacheConfig;
use parking_lot::Mutex;

use crate::lru::LruIndex;

/// Cache key: the blob-store path of the content.
pub type ContentKey = String;

/// Sizing of a [`ContentCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCacheConfig {
    pub memory_limit: u64,
    pub item_ceiling: u64,
    pub ttl: Option<Duration>,
}

impl Default for ContentCacheConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for ContentCacheConfig {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            memory_limit: cfg.memory_limit,
            item_ceiling: cfg.item_ceiling,
            ttl: cfg.ttl,
        }
    }
}

/// Counters exposed by [`ContentCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub rejections: u64,
    pub entries: usize,
    pub bytes: u64,
}

struct Slot {
    blob: Arc<[u8]>,
    cost: u64,
    stored_at: Instant,
}

struct Inner {
    slots: HashMap<ContentKey, Slot>,
    lru: LruIndex<ContentKey>,
    used: u64,
    stats: CacheStats,
}

impl Inner {
    fn remove(&mut self, key: &ContentKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.lru.remove(key);
        self.used -= slot.cost;
        Some(slot)
    }
}

/// Thread-safe, cost-bounded LRU of blobs.
pub struct ContentCache {
    config: ContentCacheConfig,
    inner: Mutex<Inner>,
}

impl ContentCache {
    pub fn new(config: ContentCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                lru: LruIndex::new(),
                used: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a blob, refreshing its recency on a hit.
    pub fn get(&self, key: &ContentKey) -> Option<Arc<[u8]>> {
        let mut inner = self.inner.lock();
        let expired = match inner.slots.get(key) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(slot) => self
                .config
                .ttl
                .is_some_and(|ttl| slot.stored_at.elapsed() > ttl),
        };
        if expired {
            inner.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            return None;
        }
        inner.lru.touch(key);
        inner.stats.hits += 1;
        inner.slots.get(key).map(|slot| Arc::clone(&slot.blob))
    }

    /// Store a blob. `cost_hint` overrides the byte length as its cost.
    ///
    /// Returns `false` if the item is refused for exceeding the per-item
    /// ceiling or the total budget.
    pub fn set(&self, key: ContentKey, blob: Arc<[u8]>, cost_hint: Option<u64>) -> bool {
        let cost = cost_hint.unwrap_or(blob.len() as u64);
        let mut inner = self.inner.lock();
        if cost > self.config.item_ceiling || cost > self.config.memory_limit {
            inner.stats.rejections += 1;
            tracing::debug!(key = %key, cost, "content cache refused oversized item");
            return false;
        }
        inner.remove(&key);
        while inner.used + cost > self.config.memory_limit {
            let Some(victim) = inner.lru.pop_oldest() else {
                break;
            };
            if let Some(slot) = inner.slots.remove(&victim) {
                inner.used -= slot.cost;
                inner.stats.evictions += 1;
            }
        }
        inner.lru.touch(&key);
        inner.slots.insert(
            key,
            Slot {
                blob,
                cost,
                stored_at: Instant::now(),
            },
        );
        inner.used += cost;
        inner.stats.insertions += 1;
        true
    }

    /// Drop an entry.
    pub fn remove(&self, key: &ContentKey) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop everything. Counters other than `entries`/`bytes` survive.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.slots.clear();
        inner.lru.clear();
        inner.used = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.lru.len(),
            bytes: inner.used,
            ..inner.stats
        }
    }

    pub fn config(&self) -> &ContentCacheConfig {
        &self.config
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(ContentCacheConfig::default())
    }
}
