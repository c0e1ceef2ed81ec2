//! Anomaly alerts produced by completed scans

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{to_validation_error, CoreError};

/// How significant a metric shift is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 20% to under 30%
    Info,

    /// 30% to under 50%
    Warning,

    /// 50% and above
    Critical,
}

impl Severity {
    /// Get the severity tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(to_validation_error(format!("unknown severity '{}'", other))),
        }
    }
}

/// A detected metric shift
///
/// Only the `seen` and `dismissed` flags change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// Alert id
    pub id: Uuid,

    /// Scan that produced the alert
    pub scan_id: Uuid,

    /// Database the metric lives in
    pub database_id: String,

    /// Severity of the shift
    pub severity: Severity,

    /// Short metric label
    pub metric_name: String,

    /// One-line summary
    pub description: String,

    /// Raw totals and row counts behind the alert
    pub detail: String,

    /// Source table
    pub table_name: String,

    /// Source column
    pub column_name: String,

    /// Total for the most recent period
    pub current_value: f64,

    /// Total for the period before it
    pub previous_value: f64,

    /// Signed percentage change
    pub change_percent: f64,

    /// Comparison query that produced the values
    pub query_used: String,

    /// Whether a user has seen the alert
    pub seen: bool,

    /// Whether a user has dismissed the alert
    pub dismissed: bool,

    /// When the alert was created
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order_and_tags() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        for severity in [Severity::Info, Severity::Warning, Severity::Critical] {
            assert_eq!(severity.as_str().parse::<Severity>().unwrap(), severity);
        }
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }
}
