//! # Firmware Accessor
//!
//! Resolving an image (download, hash, parse, stable hash, version lookup)
//! is expensive and callers ask for the same images over and over, often
//! at the same moment. Every entry point follows one protocol:
//!
//! 1. Derive a [`CacheFingerprint`] from (operation, argument). Content
//!    routes use the content id, so `get_by_blob` and `get_by_id` on the
//!    same bytes share one key.
//! 2. Acquire the [`KeyedLock`] for the fingerprint. A memo left by the
//!    holder ahead of us is returned as is, failures included. The one
//!    exception is a caller holding the bytes: it does not take a failure
//!    left by a lookup that never had them.
//! 3. Probe the [`OutcomeCache`]: successes live in a bounded LRU,
//!    failures in a negative cache that expires after a short TTL.
//! 4. Resolve. Content-id verification and parsing (with the stable hash
//!    and BIOS fields derived from it) run concurrently on the blocking
//!    pool and are joined. The outcome goes into the memo and the outcome
//!    cache, and newly seen content is persisted in the background through
//!    the [`TaskSupervisor`].
//!
//! An image the parser rejects still resolves: its handle carries the
//! hashes, no stable hash, and the parse error, which analyzers needing
//! the structure report in their own slot.
//!
//! Persistence failures are logged and never reach the caller, who already
//! holds a valid handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fwa_core::config::CacheConfig;
use fwa_core::{CacheFingerprint, CachingPolicy, ContentId, FirmwareMetadata};
use fwa_store::{DurableStore, FindFilter, InsertOutcome};
use fwa_sync::{Cached, KeyedLock, OutcomeCache, TaskSupervisor};

use crate::error::AccessError;
use crate::handle::FirmwareHandle;
use crate::parser::FirmwareParser;
use crate::repository::FirmwareRepository;

const OP_CONTENT: &str = "firmware_by_content";
const OP_VERSION: &str = "firmware_by_version";

type Resolution = Result<FirmwareHandle, AccessError>;

/// How a resolution obtains the image bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Bytes are looked up (store or repository).
    Lookup,
    /// Bytes are already in hand.
    Bytes,
}

impl Route {
    /// Whether a failure recorded by `other` applies to this route.
    fn accepts_failure_of(self, other: Route) -> bool {
        self == Route::Lookup || other == Route::Bytes
    }
}

/// Tunables of a [`FirmwareAccessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorSettings {
    /// Resolved handles kept after their last caller is gone.
    pub outcome_capacity: usize,
    /// Total image bytes those handles may pin.
    pub outcome_memory_limit: u64,
    /// How long a resolution failure is replayed.
    pub negative_ttl: Duration,
    /// Persist newly seen images to the durable store.
    pub persist: bool,
}

impl Default for AccessorSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for AccessorSettings {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            outcome_capacity: cfg.outcome_capacity,
            outcome_memory_limit: cfg.outcome_memory_limit,
            negative_ttl: cfg.negative_ttl,
            persist: true,
        }
    }
}

/// Resolves firmware handles by bytes, content id, or version name.
pub struct FirmwareAccessor {
    store: Arc<DurableStore>,
    parser: Arc<dyn FirmwareParser>,
    repository: Option<Arc<dyn FirmwareRepository>>,
    supervisor: TaskSupervisor,
    flights: KeyedLock<CacheFingerprint, (Route, Resolution)>,
    outcomes: OutcomeCache<CacheFingerprint, FirmwareHandle, AccessError>,
    settings: AccessorSettings,
}

impl FirmwareAccessor {
    pub fn new(
        store: Arc<DurableStore>,
        parser: Arc<dyn FirmwareParser>,
        supervisor: TaskSupervisor,
        settings: AccessorSettings,
    ) -> Self {
        Self {
            store,
            parser,
            repository: None,
            supervisor,
            flights: KeyedLock::new(),
            outcomes: OutcomeCache::new(
                settings.outcome_capacity,
                settings.outcome_memory_limit,
                settings.negative_ttl,
            ),
            settings,
        }
    }

    /// Enable [`FirmwareAccessor::get_by_version`].
    pub fn with_repository(mut self, repository: Arc<dyn FirmwareRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn parser(&self) -> &Arc<dyn FirmwareParser> {
        &self.parser
    }

    /// Handle for caller-supplied bytes.
    #[tracing::instrument(skip_all, fields(size = bytes.len()))]
    pub async fn get_by_blob(&self, bytes: Arc<[u8]>) -> Result<FirmwareHandle, AccessError> {
        let id = content_id_of(Arc::clone(&bytes)).await?;
        self.resolve_content(id, bytes, None).await
    }

    /// Handle for content already in the durable store.
    #[tracing::instrument(skip_all, fields(content_id = %id.short()))]
    pub async fn get_by_id(&self, id: &ContentId) -> Result<FirmwareHandle, AccessError> {
        let id = *id;
        let fingerprint = CacheFingerprint::of(OP_CONTENT, &id);
        self.single_flight(fingerprint, Route::Lookup, || self.resolve_stored(id))
            .await
    }

    /// Handle for a named version from the firmware repository.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_version(&self, name: &str) -> Result<FirmwareHandle, AccessError> {
        let fingerprint = CacheFingerprint::of(OP_VERSION, name);
        self.single_flight(fingerprint, Route::Lookup, || async {
            let repository = self.repository.as_ref().ok_or(AccessError::NoRepository)?;
            let bytes: Arc<[u8]> = repository.fetch(name).await?.into();
            let id = content_id_of(Arc::clone(&bytes)).await?;
            self.resolve_content(id, bytes, Some(name.to_string())).await
        })
        .await
    }

    /// Content route for bytes in hand. Failures recorded by lookups of
    /// this content are not replayed: the bytes are already here.
    async fn resolve_content(
        &self,
        id: ContentId,
        bytes: Arc<[u8]>,
        filename: Option<String>,
    ) -> Result<FirmwareHandle, AccessError> {
        let fingerprint = CacheFingerprint::of(OP_CONTENT, &id);
        self.single_flight(fingerprint, Route::Bytes, || async move {
            let mut meta = FirmwareMetadata::with_id(id, bytes.len() as u64);
            meta.filename = filename;
            let handle = self.derive(meta, bytes, false).await?;
            self.persist(&handle);
            Ok(handle)
        })
        .await
    }

    async fn resolve_stored(&self, id: ContentId) -> Result<FirmwareHandle, AccessError> {
        let (row, lock) = self.store.find_one(&FindFilter::by_content_id(id)).await?;
        if let Err(e) = lock.release().await {
            tracing::debug!("releasing row lock failed: {e}");
        }
        let bytes = self.store.get_bytes(&id, CachingPolicy::Default).await?;
        let stored_hash = row.stable_hash.clone();
        let handle = self.derive(row, bytes, true).await?;
        if let (Some(stored), Some(computed)) = (stored_hash, handle.stable_hash()) {
            if &stored != computed {
                tracing::warn!(
                    stored = %stored,
                    computed = %computed,
                    "stored stable hash differs from the one computed by the current parser"
                );
            }
        }
        Ok(handle)
    }

    async fn single_flight<F, Fut>(
        &self,
        fingerprint: CacheFingerprint,
        route: Route,
        resolve: F,
    ) -> Resolution
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Resolution>,
    {
        let mut guard = self.flights.acquire(fingerprint).await;
        match guard.memo() {
            Some((_, Ok(handle))) => return Ok(handle.clone()),
            Some((by, Err(e))) if route.accepts_failure_of(*by) => return Err(e.clone()),
            _ => {}
        }
        match self.outcomes.get(&fingerprint) {
            Some(Cached::Hit(handle)) => {
                guard.set_memo((route, Ok(handle.clone())));
                return Ok(handle);
            }
            Some(Cached::Failed(e)) if route == Route::Lookup => {
                tracing::debug!(fingerprint = %fingerprint.short(), "replaying cached failure");
                return Err(e);
            }
            _ => {}
        }

        let outcome = resolve().await;
        match &outcome {
            Ok(handle) => {
                if !self.outcomes.insert_ok(fingerprint, handle.clone(), handle.size()) {
                    tracing::debug!(size = handle.size(), "image too large to keep resolved");
                }
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint.short(), kind = %e.kind(), "firmware resolution failed: {e}");
                self.outcomes.insert_err(fingerprint, e.clone());
            }
        }
        guard.set_memo((route, outcome.clone()));
        outcome
    }

    /// Parse and derive metadata, verifying the content id concurrently
    /// when the bytes came from storage.
    async fn derive(
        &self,
        mut meta: FirmwareMetadata,
        bytes: Arc<[u8]>,
        verify: bool,
    ) -> Result<FirmwareHandle, AccessError> {
        let parser = Arc::clone(&self.parser);
        let image = Arc::clone(&bytes);
        let parse = tokio::task::spawn_blocking(move || {
            parser.parse(&image).map(|parsed| {
                let stable = parsed.stable_hash(&image);
                (parsed, stable)
            })
        });
        let check = async {
            if verify {
                content_id_of(Arc::clone(&bytes)).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let (parsed, actual) = tokio::join!(parse, check);

        if let Some(actual) = actual? {
            if actual != meta.content_id {
                return Err(AccessError::IntegrityMismatch {
                    expected: meta.content_id.short(),
                    actual: actual.short(),
                });
            }
        }
        meta.size = bytes.len() as u64;
        let parser = Arc::clone(&self.parser);
        let handle = match parsed? {
            Ok((parsed, stable)) => {
                meta.stable_hash = Some(stable);
                meta.fill_from_bios(&parsed.bios_info);
                FirmwareHandle::with_parsed(meta, bytes, parser, Arc::new(parsed))
            }
            Err(e) => {
                tracing::warn!(
                    content_id = %meta.content_id.short(),
                    "image kept without structure, parse failed: {e}"
                );
                meta.stable_hash = None;
                FirmwareHandle::with_parse_failure(meta, bytes, parser, e)
            }
        };
        Ok(handle)
    }

    fn persist(&self, handle: &FirmwareHandle) {
        if !self.settings.persist {
            return;
        }
        let store = Arc::clone(&self.store);
        let meta = handle.metadata().clone();
        let bytes = Arc::clone(handle.bytes());
        let spawned = self.supervisor.spawn("persist_firmware", async move {
            let id = meta.content_id.short();
            match store.insert(meta, &bytes).await {
                Ok(InsertOutcome::Inserted) => {
                    tracing::info!(content_id = %id, "persisted newly seen image")
                }
                Ok(InsertOutcome::AlreadyExists) => {
                    tracing::debug!(content_id = %id, "image already persisted")
                }
                Err(e) => {
                    tracing::warn!(content_id = %id, kind = %e.kind(), "could not persist image: {e}")
                }
            }
        });
        if let Err(e) = spawned {
            tracing::warn!("image not persisted: {e}");
        }
    }
}

async fn content_id_of(bytes: Arc<[u8]>) -> Result<ContentId, AccessError> {
    Ok(tokio::task::spawn_blocking(move || ContentId::of(&bytes)).await?)
}
