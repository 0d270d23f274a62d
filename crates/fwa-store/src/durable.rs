//! # Durable Store
//!
//! [`DurableStore`] combines a [`MetadataStore`] (rows) with a
//! [`BlobStore`] (bytes) and a [`ContentCache`] (hot bytes).
//!
//! ## Insert Protocol
//!
//! 1. Insert the metadata row in its own transaction. A duplicate key means
//!    the content is already stored: [`InsertOutcome::AlreadyExists`]. A
//!    lock-wait timeout rolls back and restarts, up to the tries limit.
//! 2. After commit, upload the blob outside any transaction with
//!    exponential backoff bounded by the retry budget.
//! 3. Stamp `ts_upload`.
//!
//! If step 2 fails the pending row is deleted so a later insert can try
//! again. A crash between steps leaves a row with no `ts_upload`;
//! [`DurableStore::reconcile`] repairs those.
//!
//! ## Reads
//!
//! [`DurableStore::get_bytes`] is single-flight per blob path: concurrent
//! readers of one path queue on a [`KeyedLock`], the first fetches (with
//! retries) and fills the cache, the rest hit the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fwa_core::config::StoreConfig;
use fwa_core::{CachingPolicy, ContentId, FirmwareMetadata, JobId};
use fwa_sync::{ContentCache, KeyedLock};

use crate::blob::BlobStore;
use crate::error::{MetaError, StoreError};
use crate::meta::{AnalyzeReportRecord, FindFilter, MetadataStore, RowLock};
use crate::retry::{retry_blob, RetryPolicy};

const REPORT_PATH_PREFIX: &str = "reports";

/// Blob path of a persisted analyze report.
pub fn report_blob_path(report_id: &ContentId) -> String {
    format!("{REPORT_PATH_PREFIX}/{}", report_id.to_hex())
}

/// Result of a successful [`DurableStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This call stored the content.
    Inserted,
    /// The content was already stored (or is being stored) by someone else.
    AlreadyExists,
}

/// Counts from one [`DurableStore::reconcile`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Blob was present; `ts_upload` stamped.
    pub stamped: usize,
    /// Blob was absent; row deleted.
    pub removed: usize,
    /// Rows left alone because a backend call failed.
    pub failed: usize,
}

/// Tunables of a [`DurableStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurableStoreSettings {
    pub insert_tries_limit: u32,
    pub retry: RetryPolicy,
}

impl Default for DurableStoreSettings {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for DurableStoreSettings {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            insert_tries_limit: cfg.insert_tries_limit,
            retry: RetryPolicy::from(cfg),
        }
    }
}

/// Content-addressed storage of firmware images and analyze reports.
pub struct DurableStore {
    meta: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<ContentCache>,
    reads: KeyedLock<String, ()>,
    settings: DurableStoreSettings,
}

impl DurableStore {
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<ContentCache>,
        settings: DurableStoreSettings,
    ) -> Self {
        Self {
            meta,
            blobs,
            cache,
            reads: KeyedLock::new(),
            settings,
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn settings(&self) -> &DurableStoreSettings {
        &self.settings
    }

    /// Run a metadata operation, restarting it on lock-wait timeouts.
    async fn with_lock_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        id: &ContentId,
        f: F,
    ) -> Result<T, MetaError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, MetaError>>,
    {
        let limit = self.settings.insert_tries_limit.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match f().await {
                Err(MetaError::LockTimeout(msg)) if attempt < limit => {
                    tracing::warn!(
                        operation,
                        content_id = %id.short(),
                        attempt,
                        "lock wait timeout, restarting transaction: {msg}"
                    );
                }
                Err(MetaError::LockTimeout(msg)) => {
                    tracing::error!(
                        operation,
                        content_id = %id.short(),
                        attempt,
                        "reached the limit of tries: {msg}"
                    );
                    return Err(MetaError::LockTimeout(format!(
                        "{msg} (after {attempt} attempts)"
                    )));
                }
                other => return other,
            }
        }
    }

    /// Store an image: metadata row first, then the blob, then `ts_upload`.
    ///
    /// `meta.content_id` must be the id of `bytes`.
    #[tracing::instrument(skip_all, fields(content_id = %meta.content_id.short(), size = bytes.len()))]
    pub async fn insert(
        &self,
        meta: FirmwareMetadata,
        bytes: &[u8],
    ) -> Result<InsertOutcome, StoreError> {
        if meta.size != bytes.len() as u64 {
            return Err(StoreError::Validation(format!(
                "metadata size {} does not match {} bytes",
                meta.size,
                bytes.len()
            )));
        }
        let id = meta.content_id;
        let row = FirmwareMetadata {
            ts_upload: None,
            ..meta
        };

        match self
            .with_lock_retries("insert_row", &id, || self.meta.insert_row(&row))
            .await
        {
            Ok(()) => {}
            Err(MetaError::Duplicate) => {
                tracing::debug!("image already stored");
                return Ok(InsertOutcome::AlreadyExists);
            }
            Err(e) => return Err(self.exhausted(e)),
        }

        let path = id.blob_path();
        let uploaded = retry_blob(&self.settings.retry, "replace", &path, || {
            self.blobs.replace(&path, bytes)
        })
        .await;
        if let Err(source) = uploaded {
            tracing::error!(path = %path, "upload failed, dropping pending row: {source}");
            if let Err(e) = self.meta.delete_pending(&id).await {
                tracing::warn!(path = %path, "could not drop pending row, leaving it for reconcile: {e}");
            }
            return Err(StoreError::UploadFailed { path, source });
        }

        let stamped = self
            .with_lock_retries("mark_uploaded", &id, || {
                self.meta.mark_uploaded(&id, Utc::now())
            })
            .await
            .map_err(|e| self.exhausted(e))?;
        if !stamped {
            // The pending row was swept while the upload was in flight.
            tracing::warn!(path = %path, "pending row vanished during upload, recording it again");
            let row = FirmwareMetadata {
                ts_upload: Some(Utc::now()),
                ..row
            };
            match self
                .with_lock_retries("insert_row", &id, || self.meta.insert_row(&row))
                .await
            {
                Ok(()) => {}
                Err(MetaError::Duplicate) => {
                    tracing::debug!("a concurrent insert recorded the image first");
                    return Ok(InsertOutcome::AlreadyExists);
                }
                Err(e) => return Err(self.exhausted(e)),
            }
        }
        tracing::info!("image stored");
        Ok(InsertOutcome::Inserted)
    }

    /// Classify a metadata error returned by [`Self::with_lock_retries`].
    fn exhausted(&self, err: MetaError) -> StoreError {
        match err {
            MetaError::LockTimeout(last) => StoreError::TransientRetryExhausted {
                attempts: self.settings.insert_tries_limit.max(1),
                last,
            },
            other => other.into(),
        }
    }

    /// Rows matching `filter`, share-locked until the [`RowLock`] is
    /// released or dropped.
    pub async fn find(
        &self,
        filter: &FindFilter,
    ) -> Result<(Vec<FirmwareMetadata>, RowLock), StoreError> {
        if filter.is_empty() {
            return Err(StoreError::EmptyFilter);
        }
        let (rows, lock) = self.meta.find(filter).await?;
        if rows.is_empty() {
            drop(lock);
            return Err(StoreError::NotFound(format!("{filter:?}")));
        }
        Ok((rows, lock))
    }

    /// Exactly one row matching `filter`.
    pub async fn find_one(
        &self,
        filter: &FindFilter,
    ) -> Result<(FirmwareMetadata, RowLock), StoreError> {
        let (mut rows, lock) = self.find(filter).await?;
        if rows.len() > 1 {
            drop(lock);
            return Err(StoreError::TooManyEntries(rows.len()));
        }
        match rows.pop() {
            Some(row) => Ok((row, lock)),
            None => Err(StoreError::NotFound(format!("{filter:?}"))),
        }
    }

    /// Image bytes by content id.
    pub async fn get_bytes(
        &self,
        id: &ContentId,
        policy: CachingPolicy,
    ) -> Result<Arc<[u8]>, StoreError> {
        self.get_bytes_by_path(&id.blob_path(), policy).await
    }

    /// Blob bytes by path: single-flight, cache-first per `policy`, retried
    /// fetch on a miss. `CachingPolicy::Default` means use and store.
    #[tracing::instrument(skip(self))]
    pub async fn get_bytes_by_path(
        &self,
        path: &str,
        policy: CachingPolicy,
    ) -> Result<Arc<[u8]>, StoreError> {
        let policy = policy.resolve(CachingPolicy::UseAndStore);
        let key = path.to_string();
        let _flight = self.reads.acquire(key.clone()).await;

        if policy.should_use() {
            if let Some(hit) = self.cache.get(&key) {
                return Ok(hit);
            }
        }

        let bytes = retry_blob(&self.settings.retry, "get", path, || self.blobs.get(path))
            .await
            .map_err(|source| StoreError::FetchFailed {
                path: path.to_string(),
                source,
            })?;
        let blob: Arc<[u8]> = bytes.into();
        if policy.should_store() {
            self.cache.set(key, Arc::clone(&blob), None);
        }
        Ok(blob)
    }

    /// Persist a serialized analyze report: blob first, then the row, so a
    /// row never points at a missing blob. Inserting the same job twice
    /// returns the existing record.
    #[tracing::instrument(skip_all, fields(job_id = %job_id))]
    pub async fn insert_report(
        &self,
        job_id: JobId,
        asset_id: Option<i64>,
        created_at: DateTime<Utc>,
        report_json: &[u8],
    ) -> Result<AnalyzeReportRecord, StoreError> {
        let report_id = ContentId::of(report_json);
        let path = report_blob_path(&report_id);
        retry_blob(&self.settings.retry, "replace", &path, || {
            self.blobs.replace(&path, report_json)
        })
        .await
        .map_err(|source| StoreError::UploadFailed {
            path: path.clone(),
            source,
        })?;

        let record = AnalyzeReportRecord {
            job_id,
            asset_id,
            created_at,
            report_id,
        };
        match self
            .with_lock_retries("insert_report", &report_id, || {
                self.meta.insert_report(&record)
            })
            .await
        {
            Ok(()) => Ok(record),
            Err(MetaError::Duplicate) => {
                tracing::debug!("report already recorded");
                self.meta
                    .find_report(&job_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("report of job {job_id}")))
            }
            Err(e) => Err(self.exhausted(e)),
        }
    }

    /// A persisted report and its JSON bytes.
    pub async fn get_report(
        &self,
        job_id: &JobId,
    ) -> Result<(AnalyzeReportRecord, Arc<[u8]>), StoreError> {
        let record = self
            .meta
            .find_report(job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("report of job {job_id}")))?;
        let bytes = self
            .get_bytes_by_path(&report_blob_path(&record.report_id), CachingPolicy::Disable)
            .await?;
        Ok((record, bytes))
    }

    /// Repair rows whose upload never completed and that were added more
    /// than `older_than` ago: stamp `ts_upload` if the blob exists, delete
    /// the row otherwise.
    ///
    /// `older_than` must exceed the blob retry budget, otherwise rows of
    /// uploads still being retried would be swept.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, older_than: Duration) -> Result<ReconcileSummary, StoreError> {
        if older_than <= self.settings.retry.budget {
            return Err(StoreError::Validation(format!(
                "grace period {older_than:?} must exceed the retry budget {:?}",
                self.settings.retry.budget
            )));
        }
        let grace = chrono::Duration::from_std(older_than)
            .map_err(|e| StoreError::Validation(format!("grace period out of range: {e}")))?;
        let cutoff = Utc::now() - grace;
        let pending = self.meta.pending_uploads(cutoff).await?;
        let mut summary = ReconcileSummary::default();

        for row in pending {
            let id = row.content_id;
            let path = id.blob_path();
            let exists = retry_blob(&self.settings.retry, "exists", &path, || {
                self.blobs.exists(&path)
            })
            .await;
            match exists {
                Ok(true) => match self.meta.mark_uploaded(&id, Utc::now()).await {
                    Ok(_) => summary.stamped += 1,
                    Err(e) => {
                        tracing::warn!(path = %path, "reconcile could not stamp row: {e}");
                        summary.failed += 1;
                    }
                },
                Ok(false) => match self.meta.delete_pending(&id).await {
                    Ok(_) => summary.removed += 1,
                    Err(e) => {
                        tracing::warn!(path = %path, "reconcile could not delete row: {e}");
                        summary.failed += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path, "reconcile could not check blob: {e}");
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(
            stamped = summary.stamped,
            removed = summary.removed,
            failed = summary.failed,
            "reconcile sweep finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::meta::MemoryMetadataStore;
    use fwa_core::HashValue;
    use fwa_sync::ContentCacheConfig;

    struct Fixture {
        meta: Arc<MemoryMetadataStore>,
        blobs: Arc<MemoryBlobStore>,
        store: DurableStore,
    }

    fn fixture() -> Fixture {
        let meta = Arc::new(MemoryMetadataStore::new(Duration::from_millis(50)));
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = DurableStore::new(
            meta.clone(),
            blobs.clone(),
            Arc::new(ContentCache::new(ContentCacheConfig::default())),
            DurableStoreSettings {
                insert_tries_limit: 5,
                retry: RetryPolicy {
                    initial_delay: Duration::from_millis(1),
                    budget: Duration::from_millis(200),
                },
            },
        );
        Fixture { meta, blobs, store }
    }

    #[tokio::test]
    async fn test_insert_then_duplicate() {
        let f = fixture();
        let bytes = b"firmware-image";
        let meta = FirmwareMetadata::for_bytes(bytes);
        let id = meta.content_id;

        assert_eq!(f.store.insert(meta.clone(), bytes).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            f.store.insert(meta, bytes).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(f.meta.row_count(), 1);
        assert_eq!(f.blobs.replace_count(), 1);
        assert!(f.meta.peek(&id).unwrap().is_uploaded());
        assert!(f.blobs.contains(&id.blob_path()));
    }

    #[tokio::test]
    async fn test_size_mismatch_rejected() {
        let f = fixture();
        let mut meta = FirmwareMetadata::for_bytes(b"abc");
        meta.size = 4;
        let err = f.store.insert(meta, b"abc").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_lock_timeouts_are_retried() {
        let f = fixture();
        f.meta.inject_lock_timeouts(4);
        let meta = FirmwareMetadata::for_bytes(b"x");
        assert_eq!(f.store.insert(meta, b"x").await.unwrap(), InsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_lock_timeouts_exhaust_tries() {
        let f = fixture();
        f.meta.inject_lock_timeouts(5);
        let meta = FirmwareMetadata::for_bytes(b"x");
        let err = f.store.insert(meta, b"x").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::TransientRetryExhausted { attempts: 5, .. }
        ));
        assert_eq!(f.meta.row_count(), 0);
    }

    #[tokio::test]
    async fn test_throttled_upload_eventually_succeeds() {
        let f = fixture();
        f.blobs.throttle_replaces(3, Some(Duration::from_millis(2)));
        let meta = FirmwareMetadata::for_bytes(b"y");
        assert_eq!(f.store.insert(meta, b"y").await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(f.blobs.replace_count(), 4);
    }

    #[tokio::test]
    async fn test_failed_upload_drops_pending_row() {
        let f = fixture();
        f.blobs.fail_next_replace(crate::error::BlobError::Io {
            path: String::new(),
            message: "disk full".into(),
        });
        let meta = FirmwareMetadata::for_bytes(b"z");
        let err = f.store.insert(meta.clone(), b"z").await.unwrap_err();
        assert!(matches!(err, StoreError::UploadFailed { .. }));
        assert_eq!(f.meta.row_count(), 0);
        // A later insert can store the content.
        assert_eq!(f.store.insert(meta, b"z").await.unwrap(), InsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_find_filters() {
        let f = fixture();
        let mut meta = FirmwareMetadata::for_bytes(b"v1");
        meta.version = Some("1.0".into());
        meta.stable_hash = Some(HashValue::new(vec![1, 2, 3]));
        f.store.insert(meta.clone(), b"v1").await.unwrap();

        assert!(matches!(
            f.store.find(&FindFilter::default()).await,
            Err(StoreError::EmptyFilter)
        ));
        assert!(matches!(
            f.store.find(&FindFilter::by_version("9.9")).await,
            Err(StoreError::NotFound(_))
        ));
        let (row, lock) = f.store.find_one(&FindFilter::by_version("1.0")).await.unwrap();
        assert_eq!(row.content_id, meta.content_id);
        lock.release().await.unwrap();

        let by_stable = FindFilter {
            stable_hash: Some(HashValue::new(vec![1, 2, 3])),
            ..FindFilter::default()
        };
        let (rows, _lock) = f.store.find(&by_stable).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_find_one_too_many() {
        let f = fixture();
        for bytes in [&b"a"[..], &b"b"[..]] {
            let mut meta = FirmwareMetadata::for_bytes(bytes);
            meta.version = Some("same".into());
            f.store.insert(meta, bytes).await.unwrap();
        }
        assert!(matches!(
            f.store.find_one(&FindFilter::by_version("same")).await,
            Err(StoreError::TooManyEntries(2))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_bytes_is_single_flight() {
        let f = fixture();
        let id = ContentId::of(b"ABC");
        f.blobs.seed(&id.blob_path(), b"ABC");
        let store = Arc::new(f.store);

        let reads: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get_bytes(&id, CachingPolicy::Default).await })
            })
            .collect();
        for r in reads {
            assert_eq!(&*r.await.unwrap().unwrap(), b"ABC");
        }
        assert_eq!(f.blobs.get_count(), 1);
    }

    #[tokio::test]
    async fn test_get_bytes_policy_disable_bypasses_cache() {
        let f = fixture();
        let id = ContentId::of(b"ABC");
        f.blobs.seed(&id.blob_path(), b"ABC");
        f.store.get_bytes(&id, CachingPolicy::Disable).await.unwrap();
        f.store.get_bytes(&id, CachingPolicy::Disable).await.unwrap();
        assert_eq!(f.blobs.get_count(), 2);
        assert_eq!(f.store.cache().stats().entries, 0);
    }

    #[tokio::test]
    async fn test_get_bytes_missing() {
        let f = fixture();
        let err = f
            .store
            .get_bytes(&ContentId::of(b"nope"), CachingPolicy::Default)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), fwa_core::FwaErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_report_roundtrip_and_idempotence() {
        let f = fixture();
        let job = JobId::new();
        let rec = f
            .store
            .insert_report(job, Some(11), Utc::now(), br#"{"ok":true}"#)
            .await
            .unwrap();
        let again = f
            .store
            .insert_report(job, Some(11), Utc::now(), br#"{"ok":true}"#)
            .await
            .unwrap();
        assert_eq!(again, rec);

        let (found, bytes) = f.store.get_report(&job).await.unwrap();
        assert_eq!(found.asset_id, Some(11));
        assert_eq!(&*bytes, br#"{"ok":true}"#);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_row_swept_during_upload_is_recorded_again() {
        let f = fixture();
        f.blobs.throttle_replaces(3, Some(Duration::from_millis(30)));
        let store = Arc::new(f.store);
        let meta = FirmwareMetadata::for_bytes(b"slow upload");
        let id = meta.content_id;

        let insert = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.insert(meta, b"slow upload").await })
        };
        while f.meta.peek(&id).is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        f.meta.backdate(&id, Utc::now() - chrono::Duration::hours(2));
        let summary = store.reconcile(Duration::from_secs(1)).await.unwrap();
        assert_eq!(summary.removed, 1);
        assert!(f.meta.peek(&id).is_none());

        assert_eq!(insert.await.unwrap().unwrap(), InsertOutcome::Inserted);
        assert!(f.meta.peek(&id).unwrap().is_uploaded());
        assert!(f.blobs.contains(&id.blob_path()));
    }

    #[tokio::test]
    async fn test_reconcile_grace_must_exceed_retry_budget() {
        let f = fixture();
        for grace in [Duration::ZERO, Duration::from_millis(200)] {
            assert!(matches!(
                f.store.reconcile(grace).await,
                Err(StoreError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_reconcile_stamps_or_removes() {
        let f = fixture();
        let with_blob = FirmwareMetadata::for_bytes(b"present");
        let without_blob = FirmwareMetadata::for_bytes(b"absent");
        let fresh = FirmwareMetadata::for_bytes(b"fresh");
        for m in [&with_blob, &without_blob, &fresh] {
            f.meta.insert_row(m).await.unwrap();
        }
        f.blobs.seed(&with_blob.blob_path(), b"present");
        let old = Utc::now() - chrono::Duration::hours(2);
        f.meta.backdate(&with_blob.content_id, old);
        f.meta.backdate(&without_blob.content_id, old);

        let summary = f.store.reconcile(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                stamped: 1,
                removed: 1,
                failed: 0
            }
        );
        assert!(f.meta.peek(&with_blob.content_id).unwrap().is_uploaded());
        assert!(f.meta.peek(&without_blob.content_id).is_none());
        assert!(!f.meta.peek(&fresh.content_id).unwrap().is_uploaded());
    }
}
