//! # Keyed Lock Properties
//!
//! Distinct keys never block each other, one key admits one holder at a
//! time, and the table is empty once every guard is gone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fwa_sync::KeyedLock;
use proptest::prelude::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_keys_do_not_block() {
    let lock: KeyedLock<String, ()> = KeyedLock::new();
    let _held = lock.acquire("a".to_string()).await;

    let other = tokio::time::timeout(Duration::from_millis(200), lock.acquire("b".to_string())).await;
    assert!(other.is_ok(), "holding key a must not block key b");

    let same = tokio::time::timeout(Duration::from_millis(50), lock.acquire("a".to_string())).await;
    assert!(same.is_err(), "key a is held");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_holder_per_key() {
    let lock: KeyedLock<u32, ()> = KeyedLock::new();
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let (lock, inside, max_inside) = (lock.clone(), inside.clone(), max_inside.clone());
            tokio::spawn(async move {
                let guard = lock.acquire(7).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            })
        })
        .collect();
    for t in futures::future::join_all(tasks).await {
        t.unwrap();
    }
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert!(lock.is_empty());
}

#[tokio::test]
async fn cancelled_waiter_leaves_no_entry() {
    let lock: KeyedLock<&'static str, ()> = KeyedLock::new();
    let held = lock.acquire("k").await;
    let waiter = tokio::time::timeout(Duration::from_millis(10), lock.acquire("k")).await;
    assert!(waiter.is_err());
    assert_eq!(lock.refcount(&"k"), 1);
    drop(held);
    assert!(lock.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn table_is_empty_after_all_releases(keys in proptest::collection::vec(0u8..6, 1..40)) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let lock: KeyedLock<u8, u32> = KeyedLock::new();
        rt.block_on(async {
            let tasks: Vec<_> = keys
                .iter()
                .map(|k| {
                    let lock = lock.clone();
                    let k = *k;
                    tokio::spawn(async move {
                        let mut guard = lock.acquire(k).await;
                        let seen = guard.memo().copied().unwrap_or(0);
                        guard.set_memo(seen + 1);
                        tokio::task::yield_now().await;
                    })
                })
                .collect();
            for t in futures::future::join_all(tasks).await {
                t.unwrap();
            }
        });
        prop_assert!(lock.is_empty());
        prop_assert_eq!(lock.len(), 0);
    }
}
