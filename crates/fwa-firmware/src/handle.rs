//! Shared handle to a resolved firmware image.

use std::sync::{Arc, OnceLock};

use fwa_core::{ContentId, FirmwareMetadata, HashValue};

use crate::error::ParseError;
use crate::parser::{FirmwareParser, ParsedFirmware};

struct Inner {
    metadata: FirmwareMetadata,
    bytes: Arc<[u8]>,
    parser: Arc<dyn FirmwareParser>,
    parsed: OnceLock<Result<Arc<ParsedFirmware>, ParseError>>,
}

/// A resolved firmware image: bytes, metadata, and its parsed structure.
///
/// Cloning shares the interior. The structure is parsed at most once per
/// handle, on first use, unless the handle was built with it.
#[derive(Clone)]
pub struct FirmwareHandle {
    inner: Arc<Inner>,
}

impl FirmwareHandle {
    /// A handle whose structure is parsed on first use.
    pub fn new(
        metadata: FirmwareMetadata,
        bytes: Arc<[u8]>,
        parser: Arc<dyn FirmwareParser>,
    ) -> Self {
        Self::build(metadata, bytes, parser, OnceLock::new())
    }

    /// A handle with its structure already parsed.
    pub fn with_parsed(
        metadata: FirmwareMetadata,
        bytes: Arc<[u8]>,
        parser: Arc<dyn FirmwareParser>,
        parsed: Arc<ParsedFirmware>,
    ) -> Self {
        Self::build(metadata, bytes, parser, OnceLock::from(Ok(parsed)))
    }

    /// A handle whose structure is known not to parse.
    pub fn with_parse_failure(
        metadata: FirmwareMetadata,
        bytes: Arc<[u8]>,
        parser: Arc<dyn FirmwareParser>,
        error: ParseError,
    ) -> Self {
        Self::build(metadata, bytes, parser, OnceLock::from(Err(error)))
    }

    fn build(
        metadata: FirmwareMetadata,
        bytes: Arc<[u8]>,
        parser: Arc<dyn FirmwareParser>,
        parsed: OnceLock<Result<Arc<ParsedFirmware>, ParseError>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                metadata,
                bytes,
                parser,
                parsed,
            }),
        }
    }

    pub fn content_id(&self) -> &ContentId {
        &self.inner.metadata.content_id
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.inner.bytes
    }

    pub fn metadata(&self) -> &FirmwareMetadata {
        &self.inner.metadata
    }

    pub fn size(&self) -> u64 {
        self.inner.metadata.size
    }

    pub fn version(&self) -> Option<&str> {
        self.inner.metadata.version.as_deref()
    }

    pub fn release_date(&self) -> Option<&str> {
        self.inner.metadata.release_date.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.inner.metadata.filename.as_deref()
    }

    pub fn stable_hash(&self) -> Option<&HashValue> {
        self.inner.metadata.stable_hash.as_ref()
    }

    /// Parsed structure, parsing on the calling thread if needed.
    pub fn parsed(&self) -> Result<Arc<ParsedFirmware>, ParseError> {
        self.inner
            .parsed
            .get_or_init(|| self.inner.parser.parse(&self.inner.bytes).map(Arc::new))
            .clone()
    }

    /// Parsed structure, parsing on the blocking pool if needed.
    pub async fn parsed_async(&self) -> Result<Arc<ParsedFirmware>, ParseError> {
        if let Some(done) = self.inner.parsed.get() {
            return done.clone();
        }
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.parsed())
            .await
            .map_err(|e| ParseError::Malformed(format!("parse task failed: {e}")))?
    }

    /// Whether two handles share one interior.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl std::fmt::Debug for FirmwareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareHandle")
            .field("content_id", &self.content_id().short())
            .field("size", &self.size())
            .field("version", &self.version())
            .field("parsed", &self.inner.parsed.get().is_some())
            .finish()
    }
}

impl PartialEq for FirmwareHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.metadata == other.inner.metadata
    }
}

impl Eq for FirmwareHandle {}
