//! # Blob Stores
//!
//! [`BlobStore`] is the seam to the object store holding image and report
//! bytes. Paths are `/`-separated relative keys such as
//! `firmware/{content-id-hex}`. `replace` is idempotent: writing the same
//! bytes to the same path twice is harmless, which is what makes retried
//! uploads safe.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;

use crate::error::BlobError;

/// Path-addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `path`, replacing any previous blob.
    async fn replace(&self, path: &str, bytes: &[u8]) -> Result<(), BlobError>;

    /// Read the blob at `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>, BlobError>;

    /// Remove the blob at `path`.
    async fn delete(&self, path: &str) -> Result<(), BlobError>;

    /// Whether a blob exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, BlobError> {
        match self.get(path).await {
            Ok(_) => Ok(true),
            Err(BlobError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject absolute paths, empty segments and parent references.
pub(crate) fn validate_path(path: &str) -> Result<(), BlobError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == ".." || seg.contains('\\'));
    if bad {
        return Err(BlobError::InvalidPath(path.to_string()));
    }
    Ok(())
}
