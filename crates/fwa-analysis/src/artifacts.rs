//! # Artifacts
//!
//! A job carries an ordered list of [`Artifact`]s; requests refer to them
//! by index. [`JobArtifacts`] resolves each firmware artifact through the
//! [`FirmwareAccessor`] at most once per job, however many requests
//! reference it.

use std::collections::HashMap;
use std::sync::Arc;

use fwa_core::ContentId;
use fwa_firmware::{AccessError, FirmwareAccessor, FirmwareHandle};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Reference to a firmware image.
#[derive(Clone)]
pub enum ImageRef {
    /// Image bytes supplied with the job.
    Blob(Arc<[u8]>),
    /// Image already in the durable store.
    ContentId(ContentId),
    /// Image from the firmware repository, by version name.
    Version(String),
}

impl std::fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blob(bytes) => write!(f, "Blob({} bytes)", bytes.len()),
            Self::ContentId(id) => write!(f, "ContentId({})", id.short()),
            Self::Version(v) => write!(f, "Version({v:?})"),
        }
    }
}

/// One job input.
#[derive(Debug, Clone)]
pub enum Artifact {
    Firmware(ImageRef),
}

impl Artifact {
    pub fn blob(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Firmware(ImageRef::Blob(bytes.into()))
    }

    pub fn content_id(id: ContentId) -> Self {
        Self::Firmware(ImageRef::ContentId(id))
    }

    pub fn version(name: impl Into<String>) -> Self {
        Self::Firmware(ImageRef::Version(name.into()))
    }
}

type Slot = Arc<OnceCell<Result<FirmwareHandle, AccessError>>>;

/// Artifacts of one job, resolved lazily and once.
pub struct JobArtifacts {
    artifacts: Vec<Artifact>,
    accessor: Arc<FirmwareAccessor>,
    resolved: Mutex<HashMap<usize, Slot>>,
}

impl JobArtifacts {
    pub fn new(artifacts: Vec<Artifact>, accessor: Arc<FirmwareAccessor>) -> Self {
        Self {
            artifacts,
            accessor,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Firmware handle of artifact `index`. `None` if the index is out of
    /// range; the orchestrator rejects such jobs up front.
    pub async fn firmware(&self, index: usize) -> Option<Result<FirmwareHandle, AccessError>> {
        let Artifact::Firmware(image) = self.artifacts.get(index)?;
        let slot = {
            let mut resolved = self.resolved.lock();
            Arc::clone(resolved.entry(index).or_default())
        };
        let outcome = slot
            .get_or_init(|| async {
                let outcome = match image {
                    ImageRef::Blob(bytes) => self.accessor.get_by_blob(Arc::clone(bytes)).await,
                    ImageRef::ContentId(id) => self.accessor.get_by_id(id).await,
                    ImageRef::Version(name) => self.accessor.get_by_version(name).await,
                };
                if let Err(e) = &outcome {
                    tracing::warn!(artifact = index, "failed to get an image: {e}");
                }
                outcome
            })
            .await;
        Some(outcome.clone())
    }
}
