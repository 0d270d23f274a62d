//! # fwa-analysis — Running Analyzers over Firmware
//!
//! An analyze job is a list of [`Artifact`]s (firmware images by blob,
//! content id or version) and a list of [`AnalyzerRequest`]s that refer to
//! artifacts by index. The [`AnalyzeOrchestrator`] runs every request in
//! parallel and returns an [`AnalyzeReport`] with one slot per request.
//!
//! ## Pieces
//!
//! - [`AnalyzerRegistry`]: analyzers by id, grouped by input family, so a
//!   lookup is statically typed.
//! - [`input`]: translation of a request into the narrow typed input of
//!   its family. Artifacts are resolved once per job by [`JobArtifacts`].
//! - [`JobCache`]: derived values (parsed image, stable hash, region
//!   diff) computed once per job, whichever request asks first.
//! - [`analyzers`]: the built-in analyzers.
//!
//! Per-request failures stay in their slot; only a structurally invalid
//! job fails the call.

pub mod analyzer;
pub mod analyzers;
pub mod artifacts;
pub mod derived;
pub mod error;
pub mod input;
pub mod job_cache;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod request;

pub use analyzer::Analyzer;
pub use artifacts::{Artifact, ImageRef, JobArtifacts};
pub use error::{AnalyzeError, AnalyzerError};
pub use input::{AnalyzerInput, DiffRegionsInput, ImageInfoInput, StableHashMatchInput};
pub use job_cache::{Derived, JobCache};
pub use orchestrator::AnalyzeOrchestrator;
pub use registry::{AnalyzerRegistry, InputFamily, RegistryError};
pub use report::{AnalyzeReport, AnalyzerResult, Issue, Report, Severity};
pub use request::{
    AnalyzerKind, AnalyzerRequest, DiffRegionsParams, ImageInfoParams, RequestKind,
    StableHashMatchParams,
};
