//! # Analyzer Inputs
//!
//! Each analyzer family takes its own narrow, typed input. Translation
//! from the generic request and job artifacts happens here, before any
//! analyzer runs; image references are resolved through [`JobArtifacts`].

use fwa_core::HashValue;
use fwa_firmware::FirmwareHandle;
use serde_json::{json, Value};

use crate::artifacts::JobArtifacts;
use crate::error::AnalyzerError;
use crate::request::{DiffRegionsParams, ImageInfoParams, StableHashMatchParams};

/// Typed input of one analyzer family.
pub trait AnalyzerInput: Send + Sync + 'static {
    /// Summary recorded in the result slot.
    fn describe(&self) -> Value;
}

fn image_summary(h: &FirmwareHandle) -> Value {
    json!({
        "content_id": h.content_id().to_hex(),
        "size": h.size(),
        "version": h.version(),
    })
}

async fn image(artifacts: &JobArtifacts, index: usize) -> Result<FirmwareHandle, AnalyzerError> {
    match artifacts.firmware(index).await {
        Some(Ok(handle)) => Ok(handle),
        Some(Err(source)) => Err(AnalyzerError::Input {
            artifact: index,
            source,
        }),
        None => Err(AnalyzerError::Validation(format!(
            "artifact index {index} is out of range [0, {})",
            artifacts.len()
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct ImageInfoInput {
    pub image: FirmwareHandle,
}

impl ImageInfoInput {
    pub async fn translate(
        params: &ImageInfoParams,
        artifacts: &JobArtifacts,
    ) -> Result<Self, AnalyzerError> {
        Ok(Self {
            image: image(artifacts, params.image).await?,
        })
    }
}

impl AnalyzerInput for ImageInfoInput {
    fn describe(&self) -> Value {
        json!({ "image": image_summary(&self.image) })
    }
}

#[derive(Debug, Clone)]
pub struct StableHashMatchInput {
    pub actual: FirmwareHandle,
    pub expected: HashValue,
}

impl StableHashMatchInput {
    pub async fn translate(
        params: &StableHashMatchParams,
        artifacts: &JobArtifacts,
    ) -> Result<Self, AnalyzerError> {
        let expected = match (&params.expected_stable_hash, params.original_image) {
            (Some(hash), None) => hash.clone(),
            (None, Some(index)) => {
                let original = image(artifacts, index).await?;
                original.stable_hash().cloned().ok_or_else(|| {
                    AnalyzerError::Failed(format!("original image {index} has no stable hash"))
                })?
            }
            _ => {
                return Err(AnalyzerError::Validation(
                    "set exactly one of expected_stable_hash and original_image".into(),
                ))
            }
        };
        Ok(Self {
            actual: image(artifacts, params.actual_image).await?,
            expected,
        })
    }
}

impl AnalyzerInput for StableHashMatchInput {
    fn describe(&self) -> Value {
        json!({
            "actual": image_summary(&self.actual),
            "expected_stable_hash": self.expected.to_hex(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DiffRegionsInput {
    pub actual: FirmwareHandle,
    pub original: FirmwareHandle,
}

impl DiffRegionsInput {
    pub async fn translate(
        params: &DiffRegionsParams,
        artifacts: &JobArtifacts,
    ) -> Result<Self, AnalyzerError> {
        let (actual, original) = tokio::join!(
            image(artifacts, params.actual_image),
            image(artifacts, params.original_image),
        );
        Ok(Self {
            actual: actual?,
            original: original?,
        })
    }
}

impl AnalyzerInput for DiffRegionsInput {
    fn describe(&self) -> Value {
        json!({
            "actual": image_summary(&self.actual),
            "original": image_summary(&self.original),
        })
    }
}
