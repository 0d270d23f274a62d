//! # Analysis Errors
//!
//! Two levels:
//!
//! - [`AnalyzerError`] fills one result slot. It never affects another
//!   slot and never fails the job.
//! - [`AnalyzeError`] rejects the whole call before any work starts; only
//!   structurally invalid jobs produce it.

use fwa_core::{AnalyzerId, FwaErrorKind};
use fwa_firmware::AccessError;
use thiserror::Error;

use crate::request::AnalyzerKind;

/// Failure of one analyzer request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    /// The request does not have exactly one analyzer kind set, or its
    /// parameters are malformed.
    #[error("invalid analyzer request: {0}")]
    Validation(String),

    #[error("analyzer {0} is not registered")]
    UnknownAnalyzer(AnalyzerId),

    /// The id names an analyzer of another input family.
    #[error("analyzer {id} takes {registered} input, request is {requested}")]
    KindMismatch {
        id: AnalyzerId,
        registered: AnalyzerKind,
        requested: AnalyzerKind,
    },

    /// An artifact could not be resolved into the analyzer input.
    #[error("cannot resolve artifact {artifact}: {source}")]
    Input {
        artifact: usize,
        #[source]
        source: AccessError,
    },

    /// The analyzer does not apply to this input.
    #[error("not applicable: {0}")]
    NotApplicable(String),

    /// The analyzer, or a derived computation it depends on, failed.
    #[error("analysis failed: {0}")]
    Failed(String),
}

impl AnalyzerError {
    pub fn kind(&self) -> FwaErrorKind {
        match self {
            Self::Validation(_) | Self::UnknownAnalyzer(_) | Self::KindMismatch { .. } => {
                FwaErrorKind::Validation
            }
            Self::Input { .. } | Self::NotApplicable(_) | Self::Failed(_) => {
                FwaErrorKind::UpstreamComputation
            }
        }
    }
}

/// Rejection of a whole analyze call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeError {
    #[error("no analyzer requests")]
    NoRequests,

    #[error("request {request} references artifact {index}, but only {len} artifacts were given")]
    ArtifactOutOfRange {
        request: usize,
        index: usize,
        len: usize,
    },
}

impl AnalyzeError {
    pub fn kind(&self) -> FwaErrorKind {
        FwaErrorKind::Validation
    }
}
