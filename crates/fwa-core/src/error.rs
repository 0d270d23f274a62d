//! # Error Types
//!
//! Every error produced in the workspace is classified into one
//! [`FwaErrorKind`]. Crate-specific error enums keep their own variants and
//! context but expose a `kind()` method, so orchestration code can decide
//! isolation and retry behavior without matching on foreign enums.
//!
//! ## Propagation Rules
//!
//! - `Validation` and `UpstreamComputation` stay inside the analyzer slot
//!   that produced them.
//! - `AlreadyExists` is benign: an idempotent insert observed its own
//!   earlier success.
//! - `Transient` has already been retried internally up to a bound.
//! - `InternalInvariant` is never returned; it is raised as a panic.

use thiserror::Error;

/// Classification shared by all `fwa-*` error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FwaErrorKind {
    /// Malformed request shape.
    Validation,
    /// Referenced content or metadata is absent.
    NotFound,
    /// Content is already stored.
    AlreadyExists,
    /// Lock-wait, timeout or throttling that outlived its retry budget.
    Transient,
    /// A dependency of an analyzer (resolution, parsing, the analyzer itself) failed.
    UpstreamComputation,
    /// A database or blob backend failed in a non-retryable way.
    Backend,
    /// Internal state is corrupted.
    InternalInvariant,
}

impl FwaErrorKind {
    /// Returns the kind as a stable snake_case string (used in reports).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Transient => "transient",
            Self::UpstreamComputation => "upstream_computation",
            Self::Backend => "backend",
            Self::InternalInvariant => "internal_invariant",
        }
    }
}

impl std::fmt::Display for FwaErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the value types of this crate.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A content identifier could not be decoded.
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    /// A hash value could not be decoded.
    #[error("invalid hash value: {0}")]
    InvalidHash(String),

    /// Configuration is malformed or violates a limit.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Classify this error.
    pub fn kind(&self) -> FwaErrorKind {
        match self {
            Self::InvalidContentId(_) | Self::InvalidHash(_) => FwaErrorKind::Validation,
            Self::Config(_) | Self::ConfigParse(_) => FwaErrorKind::Validation,
            Self::Io(_) => FwaErrorKind::Backend,
        }
    }
}
