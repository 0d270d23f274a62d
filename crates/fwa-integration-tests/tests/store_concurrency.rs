//! # Durable Store Under Contention
//!
//! Concurrent inserts of one content produce exactly one row and one
//! upload; the filesystem backend honors the same contract.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::store;
use fwa_core::{CachingPolicy, ContentId, FirmwareMetadata, JobId};
use fwa_store::{
    BlobStore, DurableStore, DurableStoreSettings, FsBlobStore, InsertOutcome, MemoryBlobStore,
    MemoryMetadataStore,
};
use fwa_sync::{ContentCache, ContentCacheConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_store_once() {
    const T: usize = 12;
    let meta = Arc::new(MemoryMetadataStore::new(Duration::from_millis(100)));
    let blobs = Arc::new(MemoryBlobStore::new());
    let store = store(meta.clone(), blobs.clone());
    let bytes: Arc<[u8]> = Arc::from(&b"contended image"[..]);

    let tasks: Vec<_> = (0..T)
        .map(|_| {
            let store = Arc::clone(&store);
            let bytes = Arc::clone(&bytes);
            tokio::spawn(async move {
                store
                    .insert(FirmwareMetadata::for_bytes(&bytes), &bytes)
                    .await
            })
        })
        .collect();
    let outcomes: Vec<InsertOutcome> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let inserted = outcomes.iter().filter(|o| **o == InsertOutcome::Inserted).count();
    let existing = outcomes.iter().filter(|o| **o == InsertOutcome::AlreadyExists).count();
    assert_eq!(inserted, 1);
    assert_eq!(existing, T - 1);
    assert_eq!(meta.row_count(), 1);
    assert_eq!(blobs.replace_count(), 1);
    assert!(meta.peek(&ContentId::of(&bytes)).unwrap().is_uploaded());
}

#[tokio::test]
async fn insert_survives_lock_wait_timeouts() {
    let meta = Arc::new(MemoryMetadataStore::new(Duration::from_millis(100)));
    let blobs = Arc::new(MemoryBlobStore::new());
    let store = store(meta.clone(), blobs.clone());
    meta.inject_lock_timeouts(3);

    let outcome = store
        .insert(FirmwareMetadata::for_bytes(b"retried"), b"retried")
        .await
        .unwrap();
    assert_eq!(outcome, InsertOutcome::Inserted);
    assert_eq!(meta.row_count(), 1);
}

#[tokio::test]
async fn filesystem_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
    let store = DurableStore::new(
        Arc::new(MemoryMetadataStore::default()),
        blobs,
        Arc::new(ContentCache::new(ContentCacheConfig::default())),
        DurableStoreSettings::default(),
    );

    let bytes = b"on disk".to_vec();
    let id = ContentId::of(&bytes);
    let outcome = store
        .insert(FirmwareMetadata::for_bytes(&bytes), &bytes)
        .await
        .unwrap();
    assert_eq!(outcome, InsertOutcome::Inserted);
    assert!(dir.path().join(id.blob_path()).exists());

    let read = store.get_bytes(&id, CachingPolicy::Disable).await.unwrap();
    assert_eq!(&*read, &bytes[..]);

    let job_id = JobId::new();
    let report = br#"{"results":[]}"#;
    store
        .insert_report(job_id, Some(3), chrono::Utc::now(), report)
        .await
        .unwrap();
    let (record, stored) = store.get_report(&job_id).await.unwrap();
    assert_eq!(record.asset_id, Some(3));
    assert_eq!(&*stored, &report[..]);
}
