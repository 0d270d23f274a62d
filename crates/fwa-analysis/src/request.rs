//! # Analyzer Requests
//!
//! A request names one analyzer kind and its parameters. On the wire it is
//! a union with one optional field per kind; exactly one must be set.
//! [`AnalyzerRequest::kind`] checks that and returns the closed, typed
//! [`RequestKind`].

use fwa_core::{AnalyzerId, HashValue};
use serde::{Deserialize, Serialize};

use crate::error::AnalyzerError;

/// Closed set of analyzer input families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    ImageInfo,
    StableHashMatch,
    DiffRegions,
}

impl AnalyzerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageInfo => "image_info",
            Self::StableHashMatch => "stable_hash_match",
            Self::DiffRegions => "diff_regions",
        }
    }

    /// Id of the analyzer used when a request does not name one.
    pub fn default_id(&self) -> AnalyzerId {
        AnalyzerId::new(self.as_str())
    }
}

impl std::fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfoParams {
    /// Artifact index of the image.
    pub image: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableHashMatchParams {
    /// Artifact index of the image taken from the host.
    pub actual_image: usize,
    /// Expected stable hash given directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_stable_hash: Option<HashValue>,
    /// Artifact index of the reference image to take the stable hash from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRegionsParams {
    pub actual_image: usize,
    pub original_image: usize,
}

/// One analyzer request as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerRequest {
    /// Overrides the kind's default analyzer id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_id: Option<AnalyzerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_info: Option<ImageInfoParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_hash_match: Option<StableHashMatchParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_regions: Option<DiffRegionsParams>,
}

/// A validated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind<'a> {
    ImageInfo(&'a ImageInfoParams),
    StableHashMatch(&'a StableHashMatchParams),
    DiffRegions(&'a DiffRegionsParams),
}

impl RequestKind<'_> {
    pub fn kind(&self) -> AnalyzerKind {
        match self {
            Self::ImageInfo(_) => AnalyzerKind::ImageInfo,
            Self::StableHashMatch(_) => AnalyzerKind::StableHashMatch,
            Self::DiffRegions(_) => AnalyzerKind::DiffRegions,
        }
    }

    /// Artifact indexes the request reads.
    pub fn artifact_indexes(&self) -> Vec<usize> {
        match self {
            Self::ImageInfo(p) => vec![p.image],
            Self::StableHashMatch(p) => std::iter::once(p.actual_image)
                .chain(p.original_image)
                .collect(),
            Self::DiffRegions(p) => vec![p.actual_image, p.original_image],
        }
    }
}

impl AnalyzerRequest {
    pub fn image_info(image: usize) -> Self {
        Self {
            image_info: Some(ImageInfoParams { image }),
            ..Self::default()
        }
    }

    pub fn stable_hash_match(params: StableHashMatchParams) -> Self {
        Self {
            stable_hash_match: Some(params),
            ..Self::default()
        }
    }

    pub fn diff_regions(actual_image: usize, original_image: usize) -> Self {
        Self {
            diff_regions: Some(DiffRegionsParams {
                actual_image,
                original_image,
            }),
            ..Self::default()
        }
    }

    /// Route to an analyzer other than the kind's default.
    pub fn with_analyzer_id(mut self, id: impl Into<AnalyzerId>) -> Self {
        self.analyzer_id = Some(id.into());
        self
    }

    /// The single kind set on this request.
    pub fn kind(&self) -> Result<RequestKind<'_>, AnalyzerError> {
        let set: Vec<RequestKind<'_>> = [
            self.image_info.as_ref().map(RequestKind::ImageInfo),
            self.stable_hash_match.as_ref().map(RequestKind::StableHashMatch),
            self.diff_regions.as_ref().map(RequestKind::DiffRegions),
        ]
        .into_iter()
        .flatten()
        .collect();
        match set.as_slice() {
            [one] => Ok(*one),
            [] => Err(AnalyzerError::Validation("no analyzer kind is set".into())),
            many => Err(AnalyzerError::Validation(format!(
                "{} analyzer kinds are set: {}",
                many.len(),
                many.iter()
                    .map(|k| k.kind().as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Analyzer id to dispatch to.
    pub fn resolved_id(&self, kind: AnalyzerKind) -> AnalyzerId {
        self.analyzer_id.clone().unwrap_or_else(|| kind.default_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_kind() {
        let ok = AnalyzerRequest::image_info(0);
        assert_eq!(ok.kind().unwrap().kind(), AnalyzerKind::ImageInfo);

        let none = AnalyzerRequest::default();
        assert!(matches!(none.kind(), Err(AnalyzerError::Validation(_))));

        let mut two = AnalyzerRequest::image_info(0);
        two.diff_regions = Some(DiffRegionsParams {
            actual_image: 0,
            original_image: 1,
        });
        let err = two.kind().unwrap_err();
        assert!(err.to_string().contains("image_info, diff_regions"));
    }

    #[test]
    fn test_resolved_id_and_indexes() {
        let req = AnalyzerRequest::diff_regions(2, 5);
        let kind = req.kind().unwrap();
        assert_eq!(kind.artifact_indexes(), vec![2, 5]);
        assert_eq!(req.resolved_id(kind.kind()).as_str(), "diff_regions");

        let custom = AnalyzerRequest::image_info(0).with_analyzer_id("image_info_v2");
        assert_eq!(custom.resolved_id(AnalyzerKind::ImageInfo).as_str(), "image_info_v2");
    }

    #[test]
    fn test_wire_shape() {
        let req: AnalyzerRequest = serde_json::from_str(
            r#"{"stable_hash_match": {"actual_image": 0, "expected_stable_hash": "abcd"}}"#,
        )
        .unwrap();
        let kind = req.kind().unwrap();
        assert_eq!(kind.kind(), AnalyzerKind::StableHashMatch);
        assert_eq!(kind.artifact_indexes(), vec![0]);
    }
}
