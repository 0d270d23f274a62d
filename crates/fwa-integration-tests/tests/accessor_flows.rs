//! # Firmware Access Across Routes
//!
//! Blob, content-id and version routes converge on one handle per content,
//! and concurrent callers share one resolution.

mod common;

use std::sync::Arc;

use common::{harness, image, MapRepository};
use fwa_core::{CachingPolicy, ContentId, FwaErrorKind};
use fwa_firmware::{AccessError, FirmwareHandle};
use fwa_store::FindFilter;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blob_and_id_routes_agree() {
    let h = harness(MapRepository::default());
    let bytes: Arc<[u8]> = image("1.0", b"payload").into();

    let by_blob = h.accessor.get_by_blob(Arc::clone(&bytes)).await.unwrap();
    h.supervisor.wait_idle().await;
    let by_id = h.accessor.get_by_id(by_blob.content_id()).await.unwrap();

    assert_eq!(by_blob.content_id(), by_id.content_id());
    assert_eq!(by_blob.bytes(), by_id.bytes());
    assert_eq!(by_blob.stable_hash(), by_id.stable_hash());
    assert_eq!(by_id.version(), Some("1.0"));

    let stored = h.store.get_bytes(&ContentId::of(&bytes), CachingPolicy::Disable).await.unwrap();
    assert_eq!(&*stored, &*bytes);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_blob_callers_resolve_once() {
    const K: usize = 16;
    let h = harness(MapRepository::default());
    let bytes: Arc<[u8]> = image("2.0", b"same content").into();

    let tasks: Vec<_> = (0..K)
        .map(|_| {
            let accessor = Arc::clone(&h.accessor);
            let bytes = Arc::clone(&bytes);
            tokio::spawn(async move { accessor.get_by_blob(bytes).await })
        })
        .collect();
    let handles: Vec<FirmwareHandle> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(h.parser.calls(), 1);
    assert!(handles.iter().all(|x| FirmwareHandle::ptr_eq(x, &handles[0])));

    h.supervisor.wait_idle().await;
    assert_eq!(h.meta.row_count(), 1);
    assert_eq!(h.blobs.replace_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn version_route_end_to_end() {
    let bytes = image("ABC", b"vendor build");
    let h = harness(MapRepository::default().with_image("ABC", &bytes));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let accessor = Arc::clone(&h.accessor);
            tokio::spawn(async move { accessor.get_by_version("ABC").await })
        })
        .collect();
    for t in futures::future::join_all(tasks).await {
        let handle = t.unwrap().unwrap();
        assert_eq!(handle.content_id(), &ContentId::of(&bytes));
        assert_eq!(handle.filename(), Some("ABC"));
    }
    assert_eq!(h.repository.fetches(), 1);
    assert_eq!(h.parser.calls(), 1);

    // Persisted in the background; then reachable by id and by version.
    h.supervisor.wait_idle().await;
    let by_id = h.accessor.get_by_id(&ContentId::of(&bytes)).await.unwrap();
    assert_eq!(by_id.version(), Some("ABC"));
    let (rows, lock) = h.store.find(&FindFilter::by_version("ABC")).await.unwrap();
    lock.release().await.unwrap();
    assert_eq!(rows.len(), 1);

    // Resolved again without another fetch.
    h.accessor.get_by_version("ABC").await.unwrap();
    assert_eq!(h.repository.fetches(), 1);
}

#[tokio::test]
async fn unknown_version_and_id_fail_cleanly() {
    let h = harness(MapRepository::default());

    let err = h.accessor.get_by_version("missing").await.unwrap_err();
    assert_eq!(err.kind(), FwaErrorKind::NotFound);

    let err = h.accessor.get_by_id(&ContentId::of(b"absent")).await.unwrap_err();
    assert!(matches!(err, AccessError::NotFound(_)));
    assert_eq!(h.parser.calls(), 0);
}
