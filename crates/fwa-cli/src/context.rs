//! # Service Wiring
//!
//! Builds the store, accessor and orchestrator from an [`FwaConfig`]:
//!
//! - `store.database_url` set: Postgres metadata, migrations applied on
//!   connect. Unset: in-memory metadata for the duration of the command.
//! - `store.blob_root` set: filesystem blobs. Unset: in-memory blobs.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use fwa_analysis::{AnalyzeOrchestrator, AnalyzerRegistry};
use fwa_core::FwaConfig;
use fwa_firmware::{AccessorSettings, DirectoryRepository, FirmwareAccessor, FlatImageParser};
use fwa_store::{
    BlobStore, DurableStore, DurableStoreSettings, FsBlobStore, MemoryBlobStore,
    MemoryMetadataStore, MetadataStore, PgMetadataStore,
};
use fwa_sync::{ContentCache, ContentCacheConfig, TaskSupervisor};

/// Image layout options shared by the commands that parse images.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ParserArgs {
    /// Byte range excluded from the stable hash, as `name=start..end`.
    /// Offsets accept `0x` hex. Repeatable.
    #[arg(long = "volatile-region", value_name = "NAME=RANGE", value_parser = parse_region)]
    pub volatile_regions: Vec<(String, Range<usize>)>,
}

impl ParserArgs {
    pub fn parser(&self) -> FlatImageParser {
        self.volatile_regions
            .iter()
            .fold(FlatImageParser::new(), |p, (name, range)| {
                p.with_volatile_region(name.clone(), range.clone())
            })
    }
}

/// Parse `name=start..end`.
pub fn parse_region(s: &str) -> Result<(String, Range<usize>), String> {
    let (name, range) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=START..END, got {s:?}"))?;
    let (start, end) = range
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {range:?}"))?;
    let (start, end) = (parse_offset(start)?, parse_offset(end)?);
    if name.trim().is_empty() {
        return Err("region name is empty".into());
    }
    if start >= end {
        return Err(format!("empty region {start}..{end}"));
    }
    Ok((name.trim().to_string(), start..end))
}

fn parse_offset(s: &str) -> Result<usize, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid offset {s:?}: {e}"))
}

/// Everything a command may need.
pub struct Services {
    pub config: FwaConfig,
    pub store: Arc<DurableStore>,
    pub supervisor: TaskSupervisor,
}

impl Services {
    pub async fn connect(config: FwaConfig) -> Result<Self> {
        let meta: Arc<dyn MetadataStore> = match &config.store.database_url {
            Some(url) => Arc::new(
                PgMetadataStore::connect(url, config.store.lock_timeout)
                    .await
                    .context("failed to connect to the metadata database")?,
            ),
            None => {
                tracing::warn!("no database configured; metadata lives in memory for this run");
                Arc::new(MemoryMetadataStore::new(config.store.lock_timeout))
            }
        };
        let blobs: Arc<dyn BlobStore> = match &config.store.blob_root {
            Some(root) => Arc::new(FsBlobStore::new(root.clone())),
            None => {
                tracing::warn!("no blob root configured; blobs live in memory for this run");
                Arc::new(MemoryBlobStore::new())
            }
        };
        let store = Arc::new(DurableStore::new(
            meta,
            blobs,
            Arc::new(ContentCache::new(ContentCacheConfig::from(&config.cache))),
            DurableStoreSettings::from(&config.store),
        ));
        Ok(Self {
            config,
            store,
            supervisor: TaskSupervisor::new(),
        })
    }

    pub fn accessor(
        &self,
        parser: &ParserArgs,
        repository: Option<PathBuf>,
    ) -> Arc<FirmwareAccessor> {
        let accessor = FirmwareAccessor::new(
            Arc::clone(&self.store),
            Arc::new(parser.parser()),
            self.supervisor.clone(),
            AccessorSettings::from(&self.config.cache),
        );
        let accessor = match repository {
            Some(root) => accessor.with_repository(Arc::new(DirectoryRepository::new(root))),
            None => accessor,
        };
        Arc::new(accessor)
    }

    pub fn orchestrator(&self, accessor: Arc<FirmwareAccessor>) -> AnalyzeOrchestrator {
        AnalyzeOrchestrator::new(
            accessor,
            Arc::new(AnalyzerRegistry::with_builtins()),
            Arc::clone(&self.store),
            self.supervisor.clone(),
        )
    }

    /// Let background persistence finish within the configured grace.
    pub async fn shutdown(&self) {
        let report = self
            .supervisor
            .shutdown(self.config.runtime.shutdown_grace)
            .await;
        if !report.graceful() {
            tracing::warn!(
                cancelled = report.cancelled,
                "background tasks cancelled at exit"
            );
        }
    }
}
