/// Engine configuration and grouping specifications.
///
/// Both are plain serde types so the schema store can hand them over as JSON.
///
/// ```
/// use livesummary::{EngineConfig, GroupingSpec};
///
/// let config = EngineConfig::from_json(r#"{"check_invariants": true}"#).unwrap();
/// assert!(config.check_invariants);
/// assert_eq!(config.summary_name_prefix, "Summary");
///
/// let spec = GroupingSpec::from_json(r#"{"columns": ["tag1", "tag2"]}"#).unwrap();
/// assert_eq!(spec.columns, vec!["tag1", "tag2"]);
/// ```

use crate::column::ColumnKind;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Runtime configuration for a `SummaryEngine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Verify every summary against the source table after each transaction.
    /// A violation rolls the transaction back.
    pub check_invariants: bool,
    /// Summary tables are named `{prefix}_{source}`, then `{prefix}_{source}2`, ...
    pub summary_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            check_invariants: cfg!(debug_assertions),
            summary_name_prefix: "Summary".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_invariant_checks(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }
}

/// Which source columns a summary groups by, in key order.
///
/// `roles`, when present, states the kind the caller expects each column to
/// have; a disagreement with the source schema rejects the spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingSpec {
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<ColumnKind>>,
}

impl GroupingSpec {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GroupingSpec {
            columns: columns.into_iter().map(Into::into).collect(),
            roles: None,
        }
    }

    pub fn with_roles(mut self, roles: Vec<ColumnKind>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SummaryError;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.summary_name_prefix, "Summary");
    }

    #[test]
    fn test_config_rejects_bad_json() {
        let err = EngineConfig::from_json(r#"{"check_invariants": "yes"}"#).unwrap_err();
        assert!(matches!(err, SummaryError::Config(_)));
    }

    #[test]
    fn test_grouping_spec_with_roles() {
        let spec = GroupingSpec::from_json(
            r#"{"columns": ["other", "tags"], "roles": ["scalar", "multi_valued"]}"#,
        )
        .unwrap();
        assert_eq!(
            spec,
            GroupingSpec::new(["other", "tags"])
                .with_roles(vec![ColumnKind::Scalar, ColumnKind::MultiValued])
        );
    }
}
