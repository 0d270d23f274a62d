//! The analyzer seam.

use async_trait::async_trait;
use fwa_core::AnalyzerId;

use crate::error::AnalyzerError;
use crate::input::AnalyzerInput;
use crate::job_cache::JobCache;
use crate::report::Report;

/// An analysis over inputs of family `I`.
///
/// Implementations are pure functions of (input, job cache): expensive
/// intermediate values go through `cache` so other requests of the same
/// job reuse them.
#[async_trait]
pub trait Analyzer<I: AnalyzerInput>: Send + Sync {
    fn id(&self) -> AnalyzerId;

    async fn analyze(&self, input: &I, cache: &JobCache) -> Result<Report, AnalyzerError>;
}
