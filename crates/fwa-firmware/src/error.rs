//! Errors of firmware parsing, repository fetches, and image resolution.
//!
//! [`AccessError`] is `Clone` because one resolution outcome is handed to
//! every caller that was queued on the same fingerprint, and failures are
//! replayed from the negative cache.

use fwa_core::FwaErrorKind;
use fwa_store::StoreError;
use thiserror::Error;

/// A firmware image could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("firmware image is empty")]
    Empty,

    /// The region layout does not fit the image.
    #[error("invalid region layout: {0}")]
    Layout(String),

    /// Image content is malformed.
    #[error("malformed image: {0}")]
    Malformed(String),
}

/// A named firmware version could not be fetched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("firmware version not found: {0}")]
    NotFound(String),

    #[error("invalid firmware version name: {0:?}")]
    InvalidName(String),

    #[error("repository io error for {name}: {message}")]
    Io { name: String, message: String },
}

impl RepositoryError {
    pub fn kind(&self) -> FwaErrorKind {
        match self {
            Self::NotFound(_) => FwaErrorKind::NotFound,
            Self::InvalidName(_) => FwaErrorKind::Validation,
            Self::Io { .. } => FwaErrorKind::Backend,
        }
    }
}

/// Resolution of a [`FirmwareHandle`](crate::FirmwareHandle) failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No stored image with this content id.
    #[error("firmware not found: {0}")]
    NotFound(String),

    /// The durable store failed after its own retries.
    #[error("store error ({kind}): {message}")]
    Store { kind: FwaErrorKind, message: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Stored bytes do not hash to the id they were stored under.
    #[error("stored bytes for {expected} hash to {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// A hashing or parsing task did not complete.
    #[error("resolution task failed: {0}")]
    Task(String),

    /// No repository is configured for version lookups.
    #[error("no firmware repository configured")]
    NoRepository,
}

impl AccessError {
    pub fn kind(&self) -> FwaErrorKind {
        match self {
            Self::NotFound(_) => FwaErrorKind::NotFound,
            Self::Store { kind, .. } => *kind,
            Self::Repository(e) => e.kind(),
            Self::NoRepository => FwaErrorKind::Validation,
            Self::IntegrityMismatch { .. } => FwaErrorKind::Backend,
            Self::Task(_) => FwaErrorKind::UpstreamComputation,
        }
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        match err.kind() {
            FwaErrorKind::NotFound => Self::NotFound(err.to_string()),
            kind => Self::Store {
                kind,
                message: err.to_string(),
            },
        }
    }
}

impl From<tokio::task::JoinError> for AccessError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_their_kind() {
        let nf: AccessError = StoreError::NotFound("x".into()).into();
        assert_eq!(nf.kind(), FwaErrorKind::NotFound);

        let transient: AccessError = StoreError::TransientRetryExhausted {
            attempts: 3,
            last: "lock".into(),
        }
        .into();
        assert_eq!(transient.kind(), FwaErrorKind::Transient);
    }

    #[test]
    fn test_repository_kinds() {
        let e: AccessError = RepositoryError::InvalidName("../x".into()).into();
        assert_eq!(e.kind(), FwaErrorKind::Validation);
        assert_eq!(
            AccessError::from(RepositoryError::NotFound("v1".into())).kind(),
            FwaErrorKind::NotFound
        );
    }
}
