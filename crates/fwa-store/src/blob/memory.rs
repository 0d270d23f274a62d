//! In-memory blob store with call counters and failure injection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{validate_path, BlobStore};
use crate::error::BlobError;

/// Blob store held in a map.
///
/// Counts every `get` and `replace`, and can be told to fail the next N
/// calls of either with a retryable error, which is how retry behavior is
/// exercised without a real backend.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Arc<[u8]>>>,
    gets: AtomicU64,
    replaces: AtomicU64,
    replace_failures: Mutex<VecDeque<BlobError>>,
    get_failures: Mutex<VecDeque<BlobError>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls so far, failed ones included.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `replace` calls so far, failed ones included.
    pub fn replace_count(&self) -> u64 {
        self.replaces.load(Ordering::SeqCst)
    }

    /// Make the next `n` replaces fail as throttled with the given hint.
    pub fn throttle_replaces(&self, n: usize, retry_after: Option<Duration>) {
        let mut q = self.replace_failures.lock();
        for _ in 0..n {
            q.push_back(BlobError::Throttled {
                path: String::new(),
                retry_after,
            });
        }
    }

    /// Make the next replace fail with `err`.
    pub fn fail_next_replace(&self, err: BlobError) {
        self.replace_failures.lock().push_back(err);
    }

    /// Make the next `n` gets fail as unavailable.
    pub fn fail_gets(&self, n: usize) {
        let mut q = self.get_failures.lock();
        for _ in 0..n {
            q.push_back(BlobError::Unavailable("injected".into()));
        }
    }

    /// Put a blob without counting it as a replace.
    pub fn seed(&self, path: &str, bytes: &[u8]) {
        self.blobs.lock().insert(path.to_string(), bytes.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn replace(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        validate_path(path)?;
        if let Some(err) = self.replace_failures.lock().pop_front() {
            return Err(match err {
                BlobError::Throttled { retry_after, .. } => BlobError::Throttled {
                    path: path.to_string(),
                    retry_after,
                },
                other => other,
            });
        }
        self.blobs.lock().insert(path.to_string(), bytes.into());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        validate_path(path)?;
        if let Some(err) = self.get_failures.lock().pop_front() {
            return Err(err);
        }
        self.blobs
            .lock()
            .get(path)
            .map(|b| b.to_vec())
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        validate_path(path)?;
        self.blobs
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        validate_path(path)?;
        Ok(self.contains(path))
    }
}
