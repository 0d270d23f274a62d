//! # Store Subcommand
//!
//! Direct access to the durable store: add an image, fetch one by content
//! id, list images matching indexed columns.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use fwa_core::{CachingPolicy, ContentId, FirmwareMetadata, HashValue};
use fwa_firmware::FirmwareParser;
use fwa_store::{FindFilter, InsertOutcome, RowLock};

use crate::context::{ParserArgs, Services};

/// Arguments for `fwa store`.
#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommand {
    /// Store a firmware image file.
    Put {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Version name; defaults to the BIOS version found in the image.
        #[arg(long)]
        version: Option<String>,
        #[command(flatten)]
        parser: ParserArgs,
    },

    /// Print the metadata of an image, optionally writing its bytes out.
    Get {
        /// Content id, hex.
        #[arg(value_name = "CONTENT_ID")]
        content_id: String,
        /// Write the image bytes here.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// List images matching all the given columns.
    Find {
        /// Hex prefix of the content id.
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        filename: Option<String>,
        /// Stable hash, hex.
        #[arg(long)]
        stable_hash: Option<String>,
    },
}

/// Execute `fwa store`.
pub async fn run_store(args: &StoreArgs, services: &Services) -> Result<u8> {
    match &args.command {
        StoreCommand::Put {
            file,
            version,
            parser,
        } => cmd_put(services, file, version.as_deref(), parser).await,
        StoreCommand::Get { content_id, out } => {
            cmd_get(services, content_id, out.as_deref()).await
        }
        StoreCommand::Find {
            prefix,
            version,
            filename,
            stable_hash,
        } => {
            let filter = FindFilter {
                content_id_prefix: prefix
                    .as_deref()
                    .map(hex::decode)
                    .transpose()
                    .context("invalid --prefix")?,
                version: version.clone(),
                filename: filename.clone(),
                stable_hash: stable_hash
                    .as_deref()
                    .map(HashValue::from_hex)
                    .transpose()
                    .context("invalid --stable-hash")?,
                ..FindFilter::default()
            };
            cmd_find(services, &filter).await
        }
    }
}

/// Metadata for an image file: content id, stable hash and BIOS fields.
/// An image the parser rejects is described by its hashes alone.
pub fn describe_image(
    file: &Path,
    bytes: &[u8],
    version: Option<&str>,
    parser: &dyn FirmwareParser,
) -> FirmwareMetadata {
    let mut meta = FirmwareMetadata::for_bytes(bytes);
    meta.version = version.map(str::to_string);
    meta.filename = file.file_name().map(|n| n.to_string_lossy().into_owned());
    match parser.parse(bytes) {
        Ok(parsed) => {
            meta.stable_hash = Some(parsed.stable_hash(bytes));
            meta.fill_from_bios(&parsed.bios_info);
        }
        Err(e) => tracing::warn!(file = %file.display(), "storing image without structure: {e}"),
    }
    meta
}

async fn cmd_put(
    services: &Services,
    file: &Path,
    version: Option<&str>,
    parser: &ParserArgs,
) -> Result<u8> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let meta = describe_image(file, &bytes, version, &parser.parser());
    let id = meta.content_id;
    match services.store.insert(meta, &bytes).await? {
        InsertOutcome::Inserted => println!("OK: stored content_id={}", id.to_hex()),
        InsertOutcome::AlreadyExists => println!("OK: already stored content_id={}", id.to_hex()),
    }
    Ok(0)
}

async fn cmd_get(services: &Services, content_id: &str, out: Option<&Path>) -> Result<u8> {
    let id = ContentId::from_hex(content_id).context("invalid content id")?;
    let (meta, lock) = match services.store.find_one(&FindFilter::by_content_id(id)).await {
        Ok(found) => found,
        Err(e) if e.kind() == fwa_core::FwaErrorKind::NotFound => {
            println!("NOT FOUND: content_id={content_id}");
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };
    release(lock).await;
    if !meta.is_uploaded() {
        bail!("image {} is not fully uploaded yet", id.short());
    }
    println!("{}", serde_json::to_string_pretty(&meta)?);

    if let Some(out) = out {
        let bytes = services.store.get_bytes(&id, CachingPolicy::Disable).await?;
        tokio::fs::write(out, &bytes)
            .await
            .with_context(|| format!("failed to write {}", out.display()))?;
        tracing::info!(path = %out.display(), size = bytes.len(), "image written");
    }
    Ok(0)
}

async fn cmd_find(services: &Services, filter: &FindFilter) -> Result<u8> {
    if filter.is_empty() {
        bail!("give at least one of --prefix, --version, --filename, --stable-hash");
    }
    let (rows, lock) = match services.store.find(filter).await {
        Ok(found) => found,
        Err(e) if e.kind() == fwa_core::FwaErrorKind::NotFound => {
            println!("NOT FOUND");
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };
    release(lock).await;
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(0)
}

async fn release(lock: RowLock) {
    if let Err(e) = lock.release().await {
        tracing::warn!("failed to release row lock: {e}");
    }
}
