use async_trait::async_trait;
use fwa_core::AnalyzerId;
use serde_json::json;

use crate::analyzer::Analyzer;
use crate::derived;
use crate::error::AnalyzerError;
use crate::input::ImageInfoInput;
use crate::job_cache::JobCache;
use crate::report::{Issue, Report, Severity};
use crate::request::AnalyzerKind;

/// Describes an image: identity, BIOS fields and region layout. An image
/// that does not parse is described by its identity alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageInfo;

#[async_trait]
impl Analyzer<ImageInfoInput> for ImageInfo {
    fn id(&self) -> AnalyzerId {
        AnalyzerKind::ImageInfo.default_id()
    }

    async fn analyze(&self, input: &ImageInfoInput, cache: &JobCache) -> Result<Report, AnalyzerError> {
        let image = &input.image;
        let parsed = match derived::parsed_image(cache, image).await {
            Ok(parsed) => parsed,
            Err(e) => {
                let mut report = Report::new(json!({
                    "content_id": image.content_id().to_hex(),
                    "size": image.size(),
                    "filename": image.filename(),
                    "stable_hash": null,
                    "bios": null,
                    "regions": null,
                }));
                report.merge_issues(vec![Issue::new(Severity::Warning, e.to_string())]);
                return Ok(report);
            }
        };
        let hash = derived::stable_hash(cache, image).await?;

        let regions: Vec<_> = parsed
            .value
            .regions
            .iter()
            .map(|r| {
                json!({
                    "name": r.name,
                    "offset": r.offset,
                    "len": r.len,
                    "volatile": r.volatile,
                })
            })
            .collect();
        let mut report = Report::new(json!({
            "content_id": image.content_id().to_hex(),
            "size": image.size(),
            "filename": image.filename(),
            "stable_hash": hash.value.to_hex(),
            "bios": parsed.value.bios_info,
            "regions": regions,
        }));
        report.merge_issues(parsed.issues);
        report.merge_issues(hash.issues);
        let volatile = parsed.value.regions.iter().filter(|r| r.volatile).count();
        report.comments.push(format!(
            "{} regions, {volatile} excluded from the stable hash",
            parsed.value.regions.len()
        ));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::testing::handle;

    #[tokio::test]
    async fn test_describes_layout_and_flags_missing_bios() {
        let input = ImageInfoInput {
            image: handle(&[7u8; 32]),
        };
        let cache = JobCache::new();
        let report = ImageInfo.analyze(&input, &cache).await.unwrap();

        assert_eq!(report.custom["size"], 32);
        assert_eq!(report.custom["regions"].as_array().unwrap().len(), 3);
        assert_eq!(report.custom["regions"][1]["name"], "nvram");
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].severity, Severity::Info);
        assert_eq!(report.comments, vec!["3 regions, 1 excluded from the stable hash"]);
    }

    #[tokio::test]
    async fn test_unparseable_image_is_described_by_identity() {
        let input = ImageInfoInput { image: handle(b"") };
        let report = ImageInfo.analyze(&input, &JobCache::new()).await.unwrap();
        assert_eq!(report.custom["size"], 0);
        assert!(report.custom["regions"].is_null());
        assert_eq!(report.worst(), Some(Severity::Warning));
    }

    #[tokio::test]
    async fn test_reads_bios_fields() {
        let mut bytes = b"$BIOSINFO$vendor=Acme;version=1.2.3;\0".to_vec();
        bytes.resize(64, 0xff);
        let input = ImageInfoInput {
            image: handle(&bytes),
        };
        let report = ImageInfo.analyze(&input, &JobCache::new()).await.unwrap();
        assert_eq!(report.custom["bios"]["vendor"], "Acme");
        assert_eq!(report.custom["bios"]["version"], "1.2.3");
        assert!(report.issues.is_empty());
    }
}
