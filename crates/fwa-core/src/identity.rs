//! # Identifiers
//!
//! Newtypes that keep job ids and analyzer ids from being confused with
//! arbitrary strings or UUIDs elsewhere in the workspace.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one `analyze` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Fresh random (v4) job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Registry key of an analyzer, e.g. `"diff_regions"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalyzerId(String);

impl AnalyzerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AnalyzerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AnalyzerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AnalyzerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique_v4() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_job_id_parse_display() {
        let a = JobId::new();
        let parsed: JobId = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_analyzer_id_transparent_serde() {
        let id = AnalyzerId::from("image_info");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"image_info\"");
    }
}
