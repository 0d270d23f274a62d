//! # fwa-core — Foundational Types for Firmware Attestation Analysis
//!
//! This crate is the leaf of the workspace DAG. It defines the identifiers
//! and value types every other `fwa-*` crate agrees on, and nothing that
//! performs I/O.
//!
//! ## Key Design Principles
//!
//! 1. **Content identity is computed, never asserted.** A [`ContentId`] is
//!    only produced by hashing bytes ([`ContentId::of`]) or by decoding a
//!    previously computed value. Identical bytes always yield the same id,
//!    whichever entry path produced them.
//!
//! 2. **Fingerprints are typed encodings.** [`CacheFingerprint`] values are
//!    built through [`FingerprintBuilder`], which tags every element with its
//!    kind and length, so `("ab", "c")` and `("a", "bc")` never collide.
//!
//! 3. **One error taxonomy.** Every crate-level error maps onto
//!    [`FwaErrorKind`], which is what callers branch on.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `fwa-*` crates.
//! - No async runtime dependency.
//! - No `.unwrap()` outside tests.

pub mod config;
pub mod content_id;
pub mod error;
pub mod fingerprint;
pub mod host;
pub mod identity;
pub mod metadata;
pub mod policy;

pub use config::FwaConfig;
pub use content_id::ContentId;
pub use error::{CoreError, FwaErrorKind};
pub use fingerprint::{CacheFingerprint, FingerprintBuilder, Fingerprintable};
pub use host::HostInfo;
pub use identity::{AnalyzerId, JobId};
pub use metadata::{BiosInfo, FirmwareMetadata, HashValue};
pub use policy::CachingPolicy;
