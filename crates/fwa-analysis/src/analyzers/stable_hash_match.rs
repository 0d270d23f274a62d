use async_trait::async_trait;
use fwa_core::AnalyzerId;
use serde_json::json;

use crate::analyzer::Analyzer;
use crate::derived;
use crate::error::AnalyzerError;
use crate::input::StableHashMatchInput;
use crate::job_cache::JobCache;
use crate::report::{Issue, Report, Severity};
use crate::request::AnalyzerKind;

/// Compares the stable hash of an image with an expected value.
#[derive(Debug, Clone, Copy, Default)]
pub struct StableHashMatch;

#[async_trait]
impl Analyzer<StableHashMatchInput> for StableHashMatch {
    fn id(&self) -> AnalyzerId {
        AnalyzerKind::StableHashMatch.default_id()
    }

    async fn analyze(
        &self,
        input: &StableHashMatchInput,
        cache: &JobCache,
    ) -> Result<Report, AnalyzerError> {
        let actual = derived::stable_hash(cache, &input.actual).await?;
        let matched = *actual.value == input.expected;

        let mut report = Report::new(json!({
            "actual": actual.value.to_hex(),
            "expected": input.expected.to_hex(),
            "matched": matched,
        }));
        report.merge_issues(actual.issues);
        if !matched {
            report.merge_issues([Issue::new(
                Severity::Critical,
                "stable hash of the image does not match the expected value",
            )
            .with_custom(json!({ "content_id": input.actual.content_id().to_hex() }))]);
        }
        Ok(report)
    }
}
