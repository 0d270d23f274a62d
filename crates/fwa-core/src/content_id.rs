//! # Content Identifier
//!
//! A [`ContentId`] is the concatenation of two independent digests over the
//! same bytes: SHA-512 followed by BLAKE3 in 512-bit extended-output mode.
//! It is the primary key of the metadata table, the blob-store path, and a
//! cache key.
//!
//! ## Integrity Invariant
//!
//! Identical bytes produce an identical `ContentId` no matter which entry
//! path (raw upload, fetch by id, fetch by version) delivered them. Breaking
//! the id requires a simultaneous collision in both hash families.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

use crate::error::CoreError;

/// Size of each half of the identifier, in bytes.
pub const HALF_LEN: usize = 64;

/// Total size of a content identifier, in bytes.
pub const CONTENT_ID_LEN: usize = HALF_LEN * 2;

/// Inputs at least this large hash both halves on separate threads.
const PARALLEL_THRESHOLD: usize = 1 << 20;

/// Prefix of the blob-store path for firmware images.
const BLOB_PATH_PREFIX: &str = "firmware";

/// Collision-resistant identifier of a blob, derived from its bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl ContentId {
    /// Compute the identifier of `bytes`.
    ///
    /// Large inputs hash the two halves concurrently; the result is the same
    /// either way.
    pub fn of(bytes: &[u8]) -> Self {
        let (sha, blake) = if bytes.len() >= PARALLEL_THRESHOLD {
            std::thread::scope(|s| {
                let sha = s.spawn(|| sha512(bytes));
                let blake = blake3_512(bytes);
                // A panic inside SHA-512 is not recoverable here; re-raise it.
                let sha = match sha.join() {
                    Ok(v) => v,
                    Err(panic) => std::panic::resume_unwind(panic),
                };
                (sha, blake)
            })
        } else {
            (sha512(bytes), blake3_512(bytes))
        };
        let mut out = [0u8; CONTENT_ID_LEN];
        out[..HALF_LEN].copy_from_slice(&sha);
        out[HALF_LEN..].copy_from_slice(&blake);
        Self(out)
    }

    /// Wrap raw identifier bytes (e.g. a database column).
    pub fn from_slice(raw: &[u8]) -> Result<Self, CoreError> {
        if raw.len() != CONTENT_ID_LEN {
            return Err(CoreError::InvalidContentId(format!(
                "expected {CONTENT_ID_LEN} bytes, got {}",
                raw.len()
            )));
        }
        let mut out = [0u8; CONTENT_ID_LEN];
        out.copy_from_slice(raw);
        Ok(Self(out))
    }

    /// Parse a hex-encoded identifier. A leading `0x` is accepted.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s)
            .map_err(|e| CoreError::InvalidContentId(format!("not hex: {e}")))?;
        Self::from_slice(&raw)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_LEN] {
        &self.0
    }

    /// The SHA-512 half.
    pub fn sha512(&self) -> &[u8] {
        &self.0[..HALF_LEN]
    }

    /// The BLAKE3-512 half.
    pub fn blake3(&self) -> &[u8] {
        &self.0[HALF_LEN..]
    }

    /// Lowercase hex rendering of the full identifier.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters; enough to correlate log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Blob-store path for the content: `firmware/{hex}`.
    pub fn blob_path(&self) -> String {
        format!("{BLOB_PATH_PREFIX}/{}", self.to_hex())
    }
}

fn sha512(bytes: &[u8]) -> [u8; HALF_LEN] {
    let mut out = [0u8; HALF_LEN];
    out.copy_from_slice(&Sha512::digest(bytes));
    out
}

fn blake3_512(bytes: &[u8]) -> [u8; HALF_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(bytes);
    let mut out = [0u8; HALF_LEN];
    hasher.finalize_xof().fill(&mut out);
    out
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentId({}…)", self.short())
    }
}

impl std::str::FromStr for ContentId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
