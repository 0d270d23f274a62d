use async_trait::async_trait;
use fwa_core::AnalyzerId;
use serde_json::json;

use crate::analyzer::Analyzer;
use crate::derived::{self, RegionChange};
use crate::error::AnalyzerError;
use crate::input::DiffRegionsInput;
use crate::job_cache::JobCache;
use crate::report::{Issue, Report, Severity};
use crate::request::AnalyzerKind;

/// Lists non-volatile regions that differ from an original image.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffRegions;

#[async_trait]
impl Analyzer<DiffRegionsInput> for DiffRegions {
    fn id(&self) -> AnalyzerId {
        AnalyzerKind::DiffRegions.default_id()
    }

    async fn analyze(&self, input: &DiffRegionsInput, cache: &JobCache) -> Result<Report, AnalyzerError> {
        let diff = derived::region_diff(cache, &input.actual, &input.original).await?;

        let mut report = Report::new(json!({ "differences": *diff.value }));
        report.merge_issues(diff.issues);
        report.merge_issues(diff.value.iter().map(|d| {
            let description = match d.change {
                RegionChange::Modified => format!("region {} was modified", d.name),
                RegionChange::Relocated => format!("region {} moved or changed size", d.name),
                RegionChange::MissingInActual => format!("region {} is missing from the image", d.name),
                RegionChange::MissingInOriginal => {
                    format!("region {} is not present in the original image", d.name)
                }
            };
            Issue::new(Severity::Warning, description).with_custom(json!({ "region": d.name }))
        }));
        if diff.value.is_empty() {
            report
                .comments
                .push("non-volatile regions are identical to the original".into());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::testing::handle;

    #[tokio::test]
    async fn test_reports_modified_region() {
        let original = vec![0u8; 32];
        let mut actual = original.clone();
        actual[20] = 1;
        actual[9] = 1;

        let input = DiffRegionsInput {
            actual: handle(&actual),
            original: handle(&original),
        };
        let report = DiffRegions.analyze(&input, &JobCache::new()).await.unwrap();
        let warnings: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].description, "region body2 was modified");
        assert_eq!(report.custom["differences"][0]["change"], "modified");
    }

    #[tokio::test]
    async fn test_identical_images() {
        let bytes = vec![3u8; 32];
        let input = DiffRegionsInput {
            actual: handle(&bytes),
            original: handle(&bytes),
        };
        let cache = JobCache::new();
        let report = DiffRegions.analyze(&input, &cache).await.unwrap();
        assert_eq!(report.worst(), Some(Severity::Info));
        assert_eq!(report.comments.len(), 1);
        // parsed image once, region diff once
        assert_eq!(cache.computations(), 2);
    }
}
