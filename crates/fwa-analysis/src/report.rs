//! # Reports
//!
//! An analyzer returns a [`Report`]: issues found in the firmware, free-form
//! comments, and an analyzer-specific `custom` value. An analyze call
//! returns an [`AnalyzeReport`] with one [`AnalyzerResult`] per request, in
//! request order.

use chrono::{DateTime, Utc};
use fwa_core::{AnalyzerId, JobId};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::AnalyzerError;

/// How important an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One problem found in the firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub custom: Value,
}

impl Issue {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            custom: Value::Null,
        }
    }

    pub fn with_custom(mut self, custom: Value) -> Self {
        self.custom = custom;
        self
    }
}

/// Outcome of one analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub custom: Value,
}

impl Report {
    pub fn new(custom: Value) -> Self {
        Self {
            custom,
            ..Self::default()
        }
    }

    /// Append issues, dropping exact duplicates while keeping first-seen
    /// order.
    pub fn merge_issues(&mut self, issues: impl IntoIterator<Item = Issue>) {
        for issue in issues {
            if !self.issues.contains(&issue) {
                self.issues.push(issue);
            }
        }
    }

    /// Highest severity among the issues.
    pub fn worst(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

/// Result slot of one analyzer request.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerResult {
    /// `None` when the request was too malformed to name an analyzer.
    pub analyzer_id: Option<AnalyzerId>,
    /// Summary of the typed input, when translation succeeded.
    pub input: Option<Value>,
    pub outcome: Result<Report, AnalyzerError>,
}

impl AnalyzerResult {
    pub fn failed(analyzer_id: Option<AnalyzerId>, input: Option<Value>, err: AnalyzerError) -> Self {
        Self {
            analyzer_id,
            input,
            outcome: Err(err),
        }
    }

    pub fn report(&self) -> Option<&Report> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AnalyzerError> {
        self.outcome.as_ref().err()
    }
}

impl Serialize for AnalyzerResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AnalyzerResult", 3)?;
        s.serialize_field("analyzer_id", &self.analyzer_id)?;
        s.serialize_field("input", &self.input)?;
        match &self.outcome {
            Ok(report) => s.serialize_field("report", report)?,
            Err(err) => s.serialize_field(
                "error",
                &serde_json::json!({
                    "kind": err.kind().as_str(),
                    "message": err.to_string(),
                }),
            )?,
        }
        s.end()
    }
}

/// Result of one analyze call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzeReport {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// One entry per request, at the request's index.
    pub results: Vec<AnalyzerResult>,
}

impl AnalyzeReport {
    /// Serialized form persisted as the report blob.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_issues_dedupes() {
        let mut report = Report::default();
        let a = Issue::new(Severity::Warning, "a");
        let b = Issue::new(Severity::Critical, "b");
        report.merge_issues([a.clone(), b.clone(), a.clone()]);
        report.merge_issues([b.clone()]);
        assert_eq!(report.issues, vec![a, b]);
        assert_eq!(report.worst(), Some(Severity::Critical));
    }

    #[test]
    fn test_result_serialization_shape() {
        let ok = AnalyzerResult {
            analyzer_id: Some("image_info".into()),
            input: None,
            outcome: Ok(Report::new(serde_json::json!({"size": 3}))),
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["report"]["custom"]["size"], 3);
        assert!(json.get("error").is_none());

        let err = AnalyzerResult::failed(None, None, AnalyzerError::Validation("two kinds".into()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"]["kind"], "validation");
        assert!(json["analyzer_id"].is_null());
    }
}
