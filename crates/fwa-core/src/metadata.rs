//! # Firmware Metadata
//!
//! [`FirmwareMetadata`] mirrors one row of `firmware_image_metadata`. The
//! content id is the primary key; the SHA-512 and BLAKE3 columns are the
//! two halves of that id, stored separately so either can be indexed.
//!
//! `ts_upload` is `None` until the blob upload has completed. A row with a
//! null `ts_upload` is either mid-insert or the remnant of a failed upload,
//! and is picked up by the reconciliation sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::content_id::ContentId;
use crate::error::CoreError;

/// Variable-length hash rendered as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashValue(Vec<u8>);

impl HashValue {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse hex, accepting a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidHash(format!("{s:?}: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for HashValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for HashValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashValue({})", self.to_hex())
    }
}

impl Serialize for HashValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HashValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// BIOS identification extracted from an image (SMBIOS type 0 equivalent).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiosInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

/// One firmware image as recorded by the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareMetadata {
    pub content_id: ContentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_hash: Option<HashValue>,
    pub ts_add: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_upload: Option<DateTime<Utc>>,
}

impl FirmwareMetadata {
    /// Fresh metadata for `bytes`, stamped now, not yet uploaded.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self::with_id(ContentId::of(bytes), bytes.len() as u64)
    }

    /// Fresh metadata for already-identified content.
    pub fn with_id(content_id: ContentId, size: u64) -> Self {
        Self {
            content_id,
            version: None,
            release_date: None,
            filename: None,
            size,
            stable_hash: None,
            ts_add: Utc::now(),
            ts_upload: None,
        }
    }

    pub fn sha512(&self) -> &[u8] {
        self.content_id.sha512()
    }

    pub fn blake3(&self) -> &[u8] {
        self.content_id.blake3()
    }

    /// Blob-store path of the image bytes.
    pub fn blob_path(&self) -> String {
        self.content_id.blob_path()
    }

    /// Whether the blob upload has completed.
    pub fn is_uploaded(&self) -> bool {
        self.ts_upload.is_some()
    }

    /// Copy the version and release date from extracted BIOS info, keeping
    /// values that are already set.
    pub fn fill_from_bios(&mut self, bios: &BiosInfo) {
        if self.version.is_none() {
            self.version = bios.version.clone();
        }
        if self.release_date.is_none() {
            self.release_date = bios.release_date.clone();
        }
    }
}
