//! Store error types.
//!
//! [`BlobError`] and [`MetaError`] are what backends return; [`StoreError`]
//! is what [`DurableStore`](crate::DurableStore) returns after retries and
//! classification.

use std::time::Duration;

use fwa_core::FwaErrorKind;
use thiserror::Error;

/// Blob backend failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// No blob at the path.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The backend asked us to back off.
    #[error("blob backend throttled request for {path}")]
    Throttled {
        path: String,
        retry_after: Option<Duration>,
    },

    /// The backend is temporarily unreachable.
    #[error("blob backend unavailable: {0}")]
    Unavailable(String),

    /// The path is not acceptable to the backend.
    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    /// Non-retryable IO failure.
    #[error("blob io error on {path}: {message}")]
    Io { path: String, message: String },
}

impl BlobError {
    /// Whether the operation may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Unavailable(_))
    }

    /// Backend-provided delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> FwaErrorKind {
        match self {
            Self::NotFound(_) => FwaErrorKind::NotFound,
            Self::Throttled { .. } | Self::Unavailable(_) => FwaErrorKind::Transient,
            Self::InvalidPath(_) => FwaErrorKind::Validation,
            Self::Io { .. } => FwaErrorKind::Backend,
        }
    }
}

/// Metadata backend failure, as classified by the backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    /// Primary key already present.
    #[error("duplicate key")]
    Duplicate,

    /// Lock wait timeout, deadlock or statement timeout. The transaction was
    /// rolled back and may be restarted.
    #[error("lock wait timeout: {0}")]
    LockTimeout(String),

    /// Anything else.
    #[error("metadata backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for MetaError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            match db.code().as_deref() {
                Some("23505") => return Self::Duplicate,
                // lock_not_available, deadlock_detected, query_canceled
                Some("55P03") | Some("40P01") | Some("57014") => {
                    return Self::LockTimeout(db.message().to_string())
                }
                _ => {}
            }
        }
        Self::Backend(err.to_string())
    }
}

/// Errors returned by [`DurableStore`](crate::DurableStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A lookup was attempted with no filter set.
    #[error("find filter is empty")]
    EmptyFilter,

    /// Nothing matched.
    #[error("not found: {0}")]
    NotFound(String),

    /// `find_one` matched several rows.
    #[error("expected one entry, found {0}")]
    TooManyEntries(usize),

    /// Input rejected before touching a backend.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Lock-wait timeouts persisted past the tries limit.
    #[error("gave up after {attempts} attempts: {last}")]
    TransientRetryExhausted { attempts: u32, last: String },

    /// A single statement hit a lock-wait timeout and was not restarted.
    #[error("lock wait timeout: {0}")]
    LockTimeout(String),

    /// The metadata row committed but the blob never made it.
    #[error("upload of {path} failed: {source}")]
    UploadFailed { path: String, source: BlobError },

    /// A blob read failed after retries.
    #[error("fetch of {path} failed: {source}")]
    FetchFailed { path: String, source: BlobError },

    /// Non-retryable metadata backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> FwaErrorKind {
        match self {
            Self::EmptyFilter | Self::TooManyEntries(_) | Self::Validation(_) => {
                FwaErrorKind::Validation
            }
            Self::NotFound(_) => FwaErrorKind::NotFound,
            Self::TransientRetryExhausted { .. } | Self::LockTimeout(_) => FwaErrorKind::Transient,
            Self::UploadFailed { source, .. } | Self::FetchFailed { source, .. } => {
                match source.kind() {
                    FwaErrorKind::NotFound => FwaErrorKind::NotFound,
                    FwaErrorKind::Transient => FwaErrorKind::Transient,
                    _ => FwaErrorKind::Backend,
                }
            }
            Self::Backend(_) => FwaErrorKind::Backend,
        }
    }
}

impl From<MetaError> for StoreError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::LockTimeout(msg) => Self::LockTimeout(msg),
            other => Self::Backend(other.to_string()),
        }
    }
}
