//! Shared fixtures: in-memory store, counting parser and repository.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fwa_firmware::{
    AccessorSettings, FirmwareAccessor, FirmwareParser, FirmwareRepository, FlatImageParser,
    ParseError, ParsedFirmware, RepositoryError,
};
use fwa_store::{DurableStore, DurableStoreSettings, MemoryBlobStore, MemoryMetadataStore, RetryPolicy};
use fwa_sync::{ContentCache, ContentCacheConfig, TaskSupervisor};

/// Flat-image parser that counts its calls.
#[derive(Default)]
pub struct CountingParser {
    calls: AtomicUsize,
}

impl CountingParser {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FirmwareParser for CountingParser {
    fn parse(&self, image: &[u8]) -> Result<ParsedFirmware, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        FlatImageParser::new()
            .with_volatile_region("nvram", 4..8)
            .parse(image)
    }
}

/// Repository over a fixed map that counts fetches.
#[derive(Default)]
pub struct MapRepository {
    images: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}

impl MapRepository {
    pub fn with_image(mut self, version: &str, bytes: &[u8]) -> Self {
        self.images.insert(version.to_string(), bytes.to_vec());
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FirmwareRepository for MapRepository {
    async fn fetch(&self, version: &str) -> Result<Vec<u8>, RepositoryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.images
            .get(version)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(version.to_string()))
    }
}

pub struct Harness {
    pub meta: Arc<MemoryMetadataStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub store: Arc<DurableStore>,
    pub parser: Arc<CountingParser>,
    pub repository: Arc<MapRepository>,
    pub supervisor: TaskSupervisor,
    pub accessor: Arc<FirmwareAccessor>,
}

pub fn store(meta: Arc<MemoryMetadataStore>, blobs: Arc<MemoryBlobStore>) -> Arc<DurableStore> {
    Arc::new(DurableStore::new(
        meta,
        blobs,
        Arc::new(ContentCache::new(ContentCacheConfig::default())),
        DurableStoreSettings {
            insert_tries_limit: 5,
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(1),
                budget: Duration::from_millis(100),
            },
        },
    ))
}

pub fn harness(repository: MapRepository) -> Harness {
    let meta = Arc::new(MemoryMetadataStore::new(Duration::from_millis(100)));
    let blobs = Arc::new(MemoryBlobStore::new());
    let store = store(meta.clone(), blobs.clone());
    let parser = Arc::new(CountingParser::default());
    let repository = Arc::new(repository);
    let supervisor = TaskSupervisor::new();
    let accessor = Arc::new(
        FirmwareAccessor::new(
            store.clone(),
            parser.clone(),
            supervisor.clone(),
            AccessorSettings::default(),
        )
        .with_repository(repository.clone()),
    );
    Harness {
        meta,
        blobs,
        store,
        parser,
        repository,
        supervisor,
        accessor,
    }
}

/// Image bytes carrying a BIOS version.
pub fn image(version: &str, body: &[u8]) -> Vec<u8> {
    let mut bytes = format!("NVNV....$BIOSINFO$vendor=Acme;version={version};\0").into_bytes();
    bytes.extend_from_slice(body);
    bytes
}
