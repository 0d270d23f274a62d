//! Postgres metadata store.
//!
//! Every transaction starts with `SET LOCAL lock_timeout`, so a statement
//! that waits on a row lock fails with SQLSTATE 55P03 instead of hanging;
//! that surfaces as [`MetaError::LockTimeout`] and the caller restarts the
//! transaction. Lookups use `SELECT ... FOR SHARE` and keep their
//! transaction open inside the returned [`RowLock`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fwa_core::{ContentId, FirmwareMetadata, HashValue, JobId};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{AnalyzeReportRecord, FindFilter, LockHolder, MetadataStore, RowLock};
use crate::error::MetaError;

const IMAGE_COLUMNS: &str =
    "content_id, stable_hash, filename, version, release_date, size, ts_add, ts_upload";

/// Metadata store backed by Postgres via SQLx.
#[derive(Debug, Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Connect, run the embedded migrations, and build the store.
    pub async fn connect(url: &str, lock_timeout: Duration) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        tracing::info!("Connected to PostgreSQL");

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");

        Ok(Self::new(pool, lock_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, MetaError> {
        let mut tx = self.pool.begin().await?;
        let stmt = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&stmt).execute(&mut *tx).await?;
        Ok(tx)
    }
}

struct PgRowLock {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LockHolder for PgRowLock {
    async fn release(self: Box<Self>) -> Result<(), MetaError> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &FindFilter) {
    if let Some(id) = &filter.content_id {
        qb.push(" AND content_id = ").push_bind(id.as_bytes().to_vec());
    }
    if let Some(prefix) = &filter.content_id_prefix {
        qb.push(" AND substring(content_id from 1 for ")
            .push_bind(prefix.len() as i32)
            .push(") = ")
            .push_bind(prefix.clone());
    }
    if let Some(h) = &filter.sha512 {
        qb.push(" AND sha512 = ").push_bind(h.as_bytes().to_vec());
    }
    if let Some(h) = &filter.blake3 {
        qb.push(" AND blake3 = ").push_bind(h.as_bytes().to_vec());
    }
    if let Some(h) = &filter.stable_hash {
        qb.push(" AND stable_hash = ").push_bind(h.as_bytes().to_vec());
    }
    if let Some(f) = &filter.filename {
        qb.push(" AND filename = ").push_bind(f.clone());
    }
    if let Some(v) = &filter.version {
        qb.push(" AND version = ").push_bind(v.clone());
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn insert_row(&self, meta: &FirmwareMetadata) -> Result<(), MetaError> {
        let size = i64::try_from(meta.size)
            .map_err(|_| MetaError::Backend(format!("image size {} overflows BIGINT", meta.size)))?;
        let mut tx = self.begin().await?;
        sqlx::query(
            "INSERT INTO firmware_image_metadata
                (content_id, sha512, blake3, stable_hash, filename, version, release_date, size, ts_add, ts_upload)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(meta.content_id.as_bytes().as_slice())
        .bind(meta.sha512())
        .bind(meta.blake3())
        .bind(meta.stable_hash.as_ref().map(HashValue::as_bytes))
        .bind(meta.filename.as_deref())
        .bind(meta.version.as_deref())
        .bind(meta.release_date.as_deref())
        .bind(size)
        .bind(meta.ts_add)
        .bind(meta.ts_upload)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_uploaded(&self, id: &ContentId, at: DateTime<Utc>) -> Result<bool, MetaError> {
        let mut tx = self.begin().await?;
        let result =
            sqlx::query("UPDATE firmware_image_metadata SET ts_upload = $1 WHERE content_id = $2")
                .bind(at)
                .bind(id.as_bytes().as_slice())
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, filter: &FindFilter) -> Result<(Vec<FirmwareMetadata>, RowLock), MetaError> {
        let mut tx = self.begin().await?;
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {IMAGE_COLUMNS} FROM firmware_image_metadata WHERE TRUE"
        ));
        push_filter(&mut qb, filter);
        qb.push(" FOR SHARE");

        let rows = qb.build_query_as::<ImageRow>().fetch_all(&mut *tx).await?;
        let metas = rows
            .into_iter()
            .map(ImageRow::into_metadata)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((metas, RowLock::new(Box::new(PgRowLock { tx }))))
    }

    async fn pending_uploads(
        &self,
        added_before: DateTime<Utc>,
    ) -> Result<Vec<FirmwareMetadata>, MetaError> {
        let rows = sqlx::query_as::<_, ImageRow>(&format!(
            "SELECT {IMAGE_COLUMNS} FROM firmware_image_metadata
             WHERE ts_upload IS NULL AND ts_add < $1 ORDER BY ts_add"
        ))
        .bind(added_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ImageRow::into_metadata).collect()
    }

    async fn delete_pending(&self, id: &ContentId) -> Result<bool, MetaError> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "DELETE FROM firmware_image_metadata WHERE content_id = $1 AND ts_upload IS NULL",
        )
        .bind(id.as_bytes().as_slice())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_report(&self, record: &AnalyzeReportRecord) -> Result<(), MetaError> {
        let mut tx = self.begin().await?;
        sqlx::query(
            "INSERT INTO analyze_reports (job_id, asset_id, ts_created, report_content_id)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(*record.job_id.as_uuid())
        .bind(record.asset_id)
        .bind(record.created_at)
        .bind(record.report_id.as_bytes().as_slice())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_report(&self, job_id: &JobId) -> Result<Option<AnalyzeReportRecord>, MetaError> {
        let row = sqlx::query_as::<_, ReportRow>(
            "SELECT job_id, asset_id, ts_created, report_content_id
             FROM analyze_reports WHERE job_id = $1",
        )
        .bind(*job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ReportRow::into_record).transpose()
    }
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct ImageRow {
    content_id: Vec<u8>,
    stable_hash: Option<Vec<u8>>,
    filename: Option<String>,
    version: Option<String>,
    release_date: Option<String>,
    size: i64,
    ts_add: DateTime<Utc>,
    ts_upload: Option<DateTime<Utc>>,
}

impl ImageRow {
    fn into_metadata(self) -> Result<FirmwareMetadata, MetaError> {
        let content_id = ContentId::from_slice(&self.content_id)
            .map_err(|e| MetaError::Backend(format!("corrupt content_id column: {e}")))?;
        let size = u64::try_from(self.size)
            .map_err(|_| MetaError::Backend(format!("negative size column: {}", self.size)))?;
        Ok(FirmwareMetadata {
            content_id,
            version: self.version,
            release_date: self.release_date,
            filename: self.filename,
            size,
            stable_hash: self.stable_hash.map(HashValue::new),
            ts_add: self.ts_add,
            ts_upload: self.ts_upload,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    job_id: Uuid,
    asset_id: Option<i64>,
    ts_created: DateTime<Utc>,
    report_content_id: Vec<u8>,
}

impl ReportRow {
    fn into_record(self) -> Result<AnalyzeReportRecord, MetaError> {
        let report_id = ContentId::from_slice(&self.report_content_id)
            .map_err(|e| MetaError::Backend(format!("corrupt report_content_id column: {e}")))?;
        Ok(AnalyzeReportRecord {
            job_id: JobId::from_uuid(self.job_id),
            asset_id: self.asset_id,
            created_at: self.ts_created,
            report_id,
        })
    }
}
