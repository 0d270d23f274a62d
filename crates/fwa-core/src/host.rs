//! Host context attached to an analysis job.

use serde::{Deserialize, Serialize};

/// Identifies the machine whose firmware and measurements are analyzed.
///
/// Every field is optional; the orchestrator records `asset_id` on the
/// persisted report when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl HostInfo {
    /// Host known only by asset id.
    pub fn with_asset_id(asset_id: i64) -> Self {
        Self {
            asset_id: Some(asset_id),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_fields_are_omitted() {
        let json = serde_json::to_string(&HostInfo::with_asset_id(7)).unwrap();
        assert_eq!(json, r#"{"asset_id":7}"#);
        let back: HostInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(back, HostInfo::default());
    }
}
