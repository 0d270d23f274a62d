//! Firmware repositories: images looked up by version name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::RepositoryError;

/// Source of firmware images addressed by version name.
#[async_trait]
pub trait FirmwareRepository: Send + Sync {
    async fn fetch(&self, version: &str) -> Result<Vec<u8>, RepositoryError>;
}

/// Repository backed by a directory holding one file per version name.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn validate_name(name: &str) -> Result<(), RepositoryError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(RepositoryError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl FirmwareRepository for DirectoryRepository {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, version: &str) -> Result<Vec<u8>, RepositoryError> {
        validate_name(version)?;
        match tokio::fs::read(self.root.join(version)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RepositoryError::NotFound(version.to_string()))
            }
            Err(e) => Err(RepositoryError::Io {
                name: version.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("X1.2"), b"image").unwrap();
        let repo = DirectoryRepository::new(dir.path());

        assert_eq!(repo.fetch("X1.2").await.unwrap(), b"image");
        assert_eq!(
            repo.fetch("X9").await,
            Err(RepositoryError::NotFound("X9".into()))
        );
    }

    #[tokio::test]
    async fn test_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DirectoryRepository::new(dir.path());
        for name in ["", ".", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(
                matches!(repo.fetch(name).await, Err(RepositoryError::InvalidName(_))),
                "accepted {name:?}"
            );
        }
    }
}
