//! Derived computations shared across analyzers through the [`JobCache`].

use std::sync::Arc;

use fwa_core::{CacheFingerprint, FingerprintBuilder, HashValue};
use fwa_firmware::{FirmwareHandle, ParsedFirmware};
use serde::Serialize;

use crate::error::AnalyzerError;
use crate::job_cache::{Derived, JobCache};
use crate::report::{Issue, Severity};

/// Parsed structure of an image, once per job and image.
pub async fn parsed_image(
    cache: &JobCache,
    image: &FirmwareHandle,
) -> Result<Derived<ParsedFirmware>, AnalyzerError> {
    let key = CacheFingerprint::of("parsed_image", image.content_id());
    cache
        .get_or_compute(key, || async {
            let parsed = image
                .parsed_async()
                .await
                .map_err(|e| AnalyzerError::Failed(format!("image {}: {e}", image.content_id().short())))?;
            let mut issues = Vec::new();
            if parsed.bios_info.version.is_none() {
                issues.push(Issue::new(
                    Severity::Info,
                    format!("image {} carries no BIOS version", image.content_id().short()),
                ));
            }
            if parsed.non_volatile().next().is_none() {
                issues.push(Issue::new(
                    Severity::Warning,
                    format!(
                        "image {} has no non-volatile regions; its stable hash covers nothing",
                        image.content_id().short()
                    ),
                ));
            }
            Ok((ParsedFirmware::clone(&parsed), issues))
        })
        .await
}

/// Stable hash of an image: the recorded one when the handle carries it,
/// otherwise computed from the parsed structure.
pub async fn stable_hash(
    cache: &JobCache,
    image: &FirmwareHandle,
) -> Result<Derived<HashValue>, AnalyzerError> {
    let key = CacheFingerprint::of("stable_hash", image.content_id());
    cache
        .get_or_compute(key, || async {
            if let Some(recorded) = image.stable_hash() {
                return Ok((recorded.clone(), Vec::new()));
            }
            let parsed = parsed_image(cache, image).await?;
            let bytes = Arc::clone(image.bytes());
            let value = Arc::clone(&parsed.value);
            let hash = tokio::task::spawn_blocking(move || value.stable_hash(&bytes))
                .await
                .map_err(|e| AnalyzerError::Failed(format!("stable hash task failed: {e}")))?;
            Ok((hash, parsed.issues))
        })
        .await
}

/// How a non-volatile region differs between two images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionChange {
    /// Same span, different bytes.
    Modified,
    /// Same name, different offset or length.
    Relocated,
    MissingInActual,
    MissingInOriginal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionDiff {
    pub name: String,
    pub change: RegionChange,
}

/// Non-volatile regions that differ between `actual` and `original`, once
/// per job and image pair.
pub async fn region_diff(
    cache: &JobCache,
    actual: &FirmwareHandle,
    original: &FirmwareHandle,
) -> Result<Derived<Vec<RegionDiff>>, AnalyzerError> {
    let mut key = FingerprintBuilder::new("region_diff");
    key.write(actual.content_id()).write(original.content_id());
    cache
        .get_or_compute(key.finish(), || async {
            let (a, o) = tokio::join!(parsed_image(cache, actual), parsed_image(cache, original));
            let (a, o) = (a?, o?);
            let mut issues = a.issues;
            issues.extend(o.issues);

            let (a_bytes, o_bytes) = (Arc::clone(actual.bytes()), Arc::clone(original.bytes()));
            let (a_parsed, o_parsed) = (a.value, o.value);
            let diffs = tokio::task::spawn_blocking(move || {
                compare_regions(&a_parsed, &a_bytes, &o_parsed, &o_bytes)
            })
            .await
            .map_err(|e| AnalyzerError::Failed(format!("region comparison failed: {e}")))?;
            Ok((diffs, issues))
        })
        .await
}

fn compare_regions(
    actual: &ParsedFirmware,
    actual_bytes: &[u8],
    original: &ParsedFirmware,
    original_bytes: &[u8],
) -> Vec<RegionDiff> {
    let mut diffs = Vec::new();
    for o in original.non_volatile() {
        let change = match actual.region(&o.name) {
            None => Some(RegionChange::MissingInActual),
            Some(a) if a.volatile => Some(RegionChange::MissingInActual),
            Some(a) if a.range() != o.range() => Some(RegionChange::Relocated),
            Some(a) => {
                let same = actual.region_bytes(actual_bytes, a) == original.region_bytes(original_bytes, o);
                (!same).then_some(RegionChange::Modified)
            }
        };
        if let Some(change) = change {
            diffs.push(RegionDiff {
                name: o.name.clone(),
                change,
            });
        }
    }
    for a in actual.non_volatile() {
        if !original.non_volatile().any(|o| o.name == a.name) {
            diffs.push(RegionDiff {
                name: a.name.clone(),
                change: RegionChange::MissingInOriginal,
            });
        }
    }
    diffs
}
