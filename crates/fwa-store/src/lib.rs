//! # fwa-store — Durable Content-Addressed Storage
//!
//! Firmware images and analyze reports are stored as blobs addressed by
//! their [`ContentId`](fwa_core::ContentId), with a relational metadata row
//! per image. This crate provides:
//!
//! - [`BlobStore`] backends: [`FsBlobStore`] and [`MemoryBlobStore`].
//! - [`MetadataStore`] backends: [`PgMetadataStore`] (Postgres via SQLx,
//!   embedded migrations) and [`MemoryMetadataStore`].
//! - [`DurableStore`], the facade that implements the insert protocol,
//!   locked lookups, single-flight cached reads, report persistence, and
//!   the reconciliation sweep.
//!
//! ## Crate Policy
//!
//! - Transient backend failures are retried here, within configured
//!   bounds; callers only see errors that outlived their retries.
//! - No metadata transaction is held open across a blob upload.

pub mod blob;
pub mod durable;
pub mod error;
pub mod meta;
pub mod retry;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use durable::{
    report_blob_path, DurableStore, DurableStoreSettings, InsertOutcome, ReconcileSummary,
};
pub use error::{BlobError, MetaError, StoreError};
pub use meta::{
    AnalyzeReportRecord, FindFilter, LockHolder, MemoryMetadataStore, MetadataStore,
    PgMetadataStore, RowLock,
};
pub use retry::RetryPolicy;
