//! # Metadata Stores
//!
//! [`MetadataStore`] is the relational half of the durable store. Every
//! method runs in its own transaction, except [`MetadataStore::find`],
//! whose transaction stays open and holds shared row locks until the
//! returned [`RowLock`] is released or dropped.
//!
//! Backends classify their failures into [`MetaError`]: a duplicate key, a
//! lock-wait timeout the caller may retry, or anything else.

mod memory;
mod pg;

pub use memory::MemoryMetadataStore;
pub use pg::PgMetadataStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fwa_core::{ContentId, FirmwareMetadata, HashValue, JobId};

use crate::error::MetaError;

/// Row of `analyze_reports`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeReportRecord {
    pub job_id: JobId,
    pub asset_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// Content id of the JSON report blob.
    pub report_id: ContentId,
}

/// Indexed-column filter for [`MetadataStore::find`]. Set fields are
/// combined with AND; unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindFilter {
    pub content_id: Option<ContentId>,
    pub content_id_prefix: Option<Vec<u8>>,
    pub sha512: Option<HashValue>,
    pub blake3: Option<HashValue>,
    pub stable_hash: Option<HashValue>,
    pub filename: Option<String>,
    pub version: Option<String>,
}

impl FindFilter {
    pub fn by_content_id(id: ContentId) -> Self {
        Self {
            content_id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..Self::default()
        }
    }

    pub fn by_filename(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluate the filter against a row.
    pub fn matches(&self, meta: &FirmwareMetadata) -> bool {
        let id = &meta.content_id;
        self.content_id.as_ref().map_or(true, |want| want == id)
            && self
                .content_id_prefix
                .as_ref()
                .map_or(true, |p| id.as_bytes().starts_with(p))
            && self
                .sha512
                .as_ref()
                .map_or(true, |h| h.as_bytes() == id.sha512())
            && self
                .blake3
                .as_ref()
                .map_or(true, |h| h.as_bytes() == id.blake3())
            && self
                .stable_hash
                .as_ref()
                .map_or(true, |h| meta.stable_hash.as_ref() == Some(h))
            && self
                .filename
                .as_ref()
                .map_or(true, |f| meta.filename.as_ref() == Some(f))
            && self
                .version
                .as_ref()
                .map_or(true, |v| meta.version.as_ref() == Some(v))
    }
}

/// Backend-specific holder of shared row locks.
#[async_trait]
pub trait LockHolder: Send {
    /// Release the locks, committing the holding transaction.
    async fn release(self: Box<Self>) -> Result<(), MetaError>;
}

/// Shared locks on the rows returned by a find.
///
/// [`RowLock::release`] commits the holding transaction; dropping the lock
/// without releasing rolls it back, which releases the locks as well.
#[must_use = "row locks are held until released or dropped"]
pub struct RowLock {
    holder: Option<Box<dyn LockHolder>>,
}

impl RowLock {
    pub fn new(holder: Box<dyn LockHolder>) -> Self {
        Self {
            holder: Some(holder),
        }
    }

    /// A lock that holds nothing.
    pub fn empty() -> Self {
        Self { holder: None }
    }

    pub async fn release(mut self) -> Result<(), MetaError> {
        match self.holder.take() {
            Some(holder) => holder.release().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RowLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLock")
            .field("held", &self.holder.is_some())
            .finish()
    }
}

/// Relational operations backing the durable store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new image row in its own transaction.
    async fn insert_row(&self, meta: &FirmwareMetadata) -> Result<(), MetaError>;

    /// Set `ts_upload`. Returns whether a row was updated.
    async fn mark_uploaded(&self, id: &ContentId, at: DateTime<Utc>) -> Result<bool, MetaError>;

    /// Rows matching `filter`, share-locked until the [`RowLock`] goes away.
    async fn find(&self, filter: &FindFilter) -> Result<(Vec<FirmwareMetadata>, RowLock), MetaError>;

    /// Rows with no `ts_upload` added before `added_before`. No locks.
    async fn pending_uploads(
        &self,
        added_before: DateTime<Utc>,
    ) -> Result<Vec<FirmwareMetadata>, MetaError>;

    /// Delete the row if its upload never completed. Returns whether a row
    /// was deleted.
    async fn delete_pending(&self, id: &ContentId) -> Result<bool, MetaError>;

    /// Record an analyze report.
    async fn insert_report(&self, record: &AnalyzeReportRecord) -> Result<(), MetaError>;

    /// Look up an analyze report by job.
    async fn find_report(&self, job_id: &JobId) -> Result<Option<AnalyzeReportRecord>, MetaError>;
}
