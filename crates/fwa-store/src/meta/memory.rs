//! In-memory metadata store.
//!
//! Rows sit in an ordered map behind one mutex; each row also carries a
//! `tokio::sync::RwLock` standing in for the database row lock. `find`
//! takes shared guards, updates and deletes take the exclusive guard, and
//! both give up after the lock timeout with [`MetaError::LockTimeout`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fwa_core::{ContentId, FirmwareMetadata, JobId};
use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::{AnalyzeReportRecord, FindFilter, LockHolder, MetadataStore, RowLock};
use crate::error::MetaError;

struct Row {
    meta: Mutex<FirmwareMetadata>,
    lock: Arc<RwLock<()>>,
}

#[derive(Default)]
struct Tables {
    images: BTreeMap<ContentId, Arc<Row>>,
    reports: HashMap<JobId, AnalyzeReportRecord>,
}

/// Metadata store kept in process memory.
pub struct MemoryMetadataStore {
    tables: Mutex<Tables>,
    lock_timeout: Duration,
    injected_timeouts: Mutex<usize>,
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemoryMetadataStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            lock_timeout,
            injected_timeouts: Mutex::new(0),
        }
    }

    /// Make the next `n` inserts fail with a lock-wait timeout.
    pub fn inject_lock_timeouts(&self, n: usize) {
        *self.injected_timeouts.lock() += n;
    }

    /// Number of image rows.
    pub fn row_count(&self) -> usize {
        self.tables.lock().images.len()
    }

    /// Snapshot of one row, without locking it.
    pub fn peek(&self, id: &ContentId) -> Option<FirmwareMetadata> {
        let row = self.tables.lock().images.get(id).cloned()?;
        let meta = row.meta.lock().clone();
        Some(meta)
    }

    /// Overwrite `ts_add` of a row; lets tests age rows for the sweep.
    pub fn backdate(&self, id: &ContentId, ts_add: DateTime<Utc>) -> bool {
        let Some(row) = self.tables.lock().images.get(id).cloned() else {
            return false;
        };
        row.meta.lock().ts_add = ts_add;
        true
    }

    fn take_injected_timeout(&self) -> bool {
        let mut n = self.injected_timeouts.lock();
        if *n > 0 {
            *n -= 1;
            true
        } else {
            false
        }
    }

    fn row(&self, id: &ContentId) -> Option<Arc<Row>> {
        self.tables.lock().images.get(id).cloned()
    }

    async fn lock_exclusive(&self, row: &Row) -> Result<OwnedRwLockWriteGuard<()>, MetaError> {
        tokio::time::timeout(self.lock_timeout, Arc::clone(&row.lock).write_owned())
            .await
            .map_err(|_| MetaError::LockTimeout("row is share-locked".into()))
    }
}

struct MemoryRowLock {
    _guards: Vec<OwnedRwLockReadGuard<()>>,
}

#[async_trait]
impl LockHolder for MemoryRowLock {
    async fn release(self: Box<Self>) -> Result<(), MetaError> {
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_row(&self, meta: &FirmwareMetadata) -> Result<(), MetaError> {
        if self.take_injected_timeout() {
            return Err(MetaError::LockTimeout("injected".into()));
        }
        let mut tables = self.tables.lock();
        if tables.images.contains_key(&meta.content_id) {
            return Err(MetaError::Duplicate);
        }
        tables.images.insert(
            meta.content_id,
            Arc::new(Row {
                meta: Mutex::new(meta.clone()),
                lock: Arc::new(RwLock::new(())),
            }),
        );
        Ok(())
    }

    async fn mark_uploaded(&self, id: &ContentId, at: DateTime<Utc>) -> Result<bool, MetaError> {
        let Some(row) = self.row(id) else {
            return Ok(false);
        };
        let _guard = self.lock_exclusive(&row).await?;
        row.meta.lock().ts_upload = Some(at);
        Ok(true)
    }

    async fn find(&self, filter: &FindFilter) -> Result<(Vec<FirmwareMetadata>, RowLock), MetaError> {
        let candidates: Vec<Arc<Row>> = {
            let tables = self.tables.lock();
            tables
                .images
                .values()
                .filter(|row| filter.matches(&row.meta.lock()))
                .cloned()
                .collect()
        };

        let mut guards = Vec::with_capacity(candidates.len());
        let mut rows = Vec::with_capacity(candidates.len());
        for row in candidates {
            let guard = tokio::time::timeout(self.lock_timeout, Arc::clone(&row.lock).read_owned())
                .await
                .map_err(|_| MetaError::LockTimeout("row is exclusively locked".into()))?;
            let meta = row.meta.lock().clone();
            // The row may have been deleted while we waited.
            if self.row(&meta.content_id).is_some() {
                guards.push(guard);
                rows.push(meta);
            }
        }
        Ok((rows, RowLock::new(Box::new(MemoryRowLock { _guards: guards }))))
    }

    async fn pending_uploads(
        &self,
        added_before: DateTime<Utc>,
    ) -> Result<Vec<FirmwareMetadata>, MetaError> {
        let tables = self.tables.lock();
        Ok(tables
            .images
            .values()
            .map(|row| row.meta.lock().clone())
            .filter(|m| m.ts_upload.is_none() && m.ts_add < added_before)
            .collect())
    }

    async fn delete_pending(&self, id: &ContentId) -> Result<bool, MetaError> {
        let Some(row) = self.row(id) else {
            return Ok(false);
        };
        let _guard = self.lock_exclusive(&row).await?;
        if row.meta.lock().ts_upload.is_some() {
            return Ok(false);
        }
        Ok(self.tables.lock().images.remove(id).is_some())
    }

    async fn insert_report(&self, record: &AnalyzeReportRecord) -> Result<(), MetaError> {
        let mut tables = self.tables.lock();
        if tables.reports.contains_key(&record.job_id) {
            return Err(MetaError::Duplicate);
        }
        tables.reports.insert(record.job_id, record.clone());
        Ok(())
    }

    async fn find_report(&self, job_id: &JobId) -> Result<Option<AnalyzeReportRecord>, MetaError> {
        Ok(self.tables.lock().reports.get(job_id).cloned())
    }
}
