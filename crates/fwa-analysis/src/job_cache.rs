//! # Job Cache
//!
//! Analyzers of one job often need the same expensive derived value (a
//! parsed image, a region diff). [`JobCache`] computes each value once per
//! job, keyed by (value type, [`CacheFingerprint`] of its inputs), and hands
//! every requester the same `Arc`. Concurrent requesters of one key wait for
//! the first computation instead of starting their own.
//!
//! Failures are cached too: the job is short-lived, so a failed derivation
//! is reported identically to every analyzer that depends on it.
//!
//! The cache lives for one analyze call and is dropped with it.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fwa_core::CacheFingerprint;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::AnalyzerError;
use crate::report::Issue;

type AnyValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct Stored {
    value: Result<AnyValue, AnalyzerError>,
    issues: Vec<Issue>,
}

/// A derived value with the issues found while deriving it.
#[derive(Debug)]
pub struct Derived<T> {
    pub value: Arc<T>,
    pub issues: Vec<Issue>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            issues: self.issues.clone(),
        }
    }
}

/// Per-job memo of derived computations.
#[derive(Default)]
pub struct JobCache {
    cells: Mutex<HashMap<(TypeId, CacheFingerprint), Arc<OnceCell<Stored>>>>,
    computations: AtomicUsize,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of type `T` for `key`, computing it with `compute` if no
    /// requester has done so yet in this job.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: CacheFingerprint,
        compute: F,
    ) -> Result<Derived<T>, AnalyzerError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Vec<Issue>), AnalyzerError>>,
    {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry((TypeId::of::<T>(), key)).or_default())
        };
        let stored = cell
            .get_or_init(|| async {
                self.computations.fetch_add(1, Ordering::Relaxed);
                match compute().await {
                    Ok((value, issues)) => Stored {
                        value: Ok(Arc::new(value) as AnyValue),
                        issues,
                    },
                    Err(e) => Stored {
                        value: Err(e),
                        issues: Vec::new(),
                    },
                }
            })
            .await
            .clone();

        let value = stored.value?;
        match value.downcast::<T>() {
            Ok(value) => Ok(Derived {
                value,
                issues: stored.issues,
            }),
            // Keys carry the TypeId, so a mismatch means the map is corrupted.
            Err(_) => panic!(
                "job cache: entry for {} holds a value of another type",
                type_name::<T>()
            ),
        }
    }

    /// Number of computations started so far.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Severity;
    use std::time::Duration;

    fn key(name: &str) -> CacheFingerprint {
        CacheFingerprint::of("test", name)
    }

    #[tokio::test]
    async fn test_computes_once_per_key() {
        let cache = JobCache::new();
        let a: Derived<u64> = cache.get_or_compute(key("a"), || async { Ok((1, vec![])) }).await.unwrap();
        let b: Derived<u64> = cache.get_or_compute(key("a"), || async { Ok((2, vec![])) }).await.unwrap();
        assert_eq!((*a.value, *b.value), (1, 1));
        assert!(Arc::ptr_eq(&a.value, &b.value));
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test]
    async fn test_type_is_part_of_the_key() {
        let cache = JobCache::new();
        let n: Derived<u64> = cache.get_or_compute(key("k"), || async { Ok((7, vec![])) }).await.unwrap();
        let s: Derived<String> = cache
            .get_or_compute(key("k"), || async { Ok(("seven".to_string(), vec![])) })
            .await
            .unwrap();
        assert_eq!(*n.value, 7);
        assert_eq!(*s.value, "seven");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requesters_share_one_computation() {
        let cache = Arc::new(JobCache::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .get_or_compute::<u64, _, _>(key("slow"), || async {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok((42, vec![Issue::new(Severity::Info, "derived")]))
                        })
                        .await
                })
            })
            .collect();
        for t in tasks {
            let d = t.await.unwrap().unwrap();
            assert_eq!(*d.value, 42);
            assert_eq!(d.issues.len(), 1);
        }
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_shared() {
        let cache = JobCache::new();
        let first = cache
            .get_or_compute::<u64, _, _>(key("bad"), || async {
                Err(AnalyzerError::Failed("boom".into()))
            })
            .await
            .unwrap_err();
        let second = cache
            .get_or_compute::<u64, _, _>(key("bad"), || async { Ok((1, vec![])) })
            .await
            .unwrap_err();
        assert_eq!(first, second);
        assert_eq!(cache.computations(), 1);
    }
}
