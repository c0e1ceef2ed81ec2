//! Audit records for guarded query executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{to_validation_error, CoreError};

/// Outcome of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// Refused by the guardrails; nothing was sent to the database
    Rejected,

    /// Sent to the database and failed
    Error,

    /// Executed successfully
    Success,
}

impl AuditStatus {
    /// Get the status tag
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Rejected => "rejected",
            AuditStatus::Error => "error",
            AuditStatus::Success => "success",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rejected" => Ok(AuditStatus::Rejected),
            "error" => Ok(AuditStatus::Error),
            "success" => Ok(AuditStatus::Success),
            other => Err(to_validation_error(format!("unknown audit status '{}'", other))),
        }
    }
}

/// Immutable log entry for one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record id
    pub id: Uuid,

    /// External database the query targeted
    pub database_id: String,

    /// Query text as executed (after limit rewriting) or as rejected
    pub query_text: String,

    /// Bound parameters
    pub params: Vec<serde_json::Value>,

    /// Outcome
    pub status: AuditStatus,

    /// Error text for rejected or failed attempts
    pub error: Option<String>,

    /// Rows returned on success
    pub row_count: Option<u64>,

    /// Wall-clock execution time, when the query reached the database
    pub execution_time_ms: Option<u64>,

    /// When the attempt was recorded
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    fn new(database_id: &str, query_text: &str, params: &[serde_json::Value], status: AuditStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            database_id: database_id.to_string(),
            query_text: query_text.to_string(),
            params: params.to_vec(),
            status,
            error: None,
            row_count: None,
            execution_time_ms: None,
            created_at: Utc::now(),
        }
    }

    /// Record a query refused by the guardrails
    pub fn rejected(database_id: &str, query_text: &str, params: &[serde_json::Value], reason: &str) -> Self {
        Self {
            error: Some(reason.to_string()),
            ..Self::new(database_id, query_text, params, AuditStatus::Rejected)
        }
    }

    /// Record a query that failed at the database
    pub fn failed(
        database_id: &str,
        query_text: &str,
        params: &[serde_json::Value],
        error: &str,
        execution_time_ms: Option<u64>,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            execution_time_ms,
            ..Self::new(database_id, query_text, params, AuditStatus::Error)
        }
    }

    /// Record a successful query
    pub fn succeeded(
        database_id: &str,
        query_text: &str,
        params: &[serde_json::Value],
        row_count: u64,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            row_count: Some(row_count),
            execution_time_ms: Some(execution_time_ms),
            ..Self::new(database_id, query_text, params, AuditStatus::Success)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let rejected = AuditRecord::rejected("db1", "DROP TABLE x", &[], "Only SELECT statements are allowed");
        assert_eq!(rejected.status, AuditStatus::Rejected);
        assert!(rejected.row_count.is_none());
        assert!(rejected.execution_time_ms.is_none());

        let ok = AuditRecord::succeeded("db1", "SELECT 1 LIMIT 1000", &[serde_json::json!(5)], 1, 12);
        assert_eq!(ok.status, AuditStatus::Success);
        assert_eq!(ok.row_count, Some(1));
        assert_eq!(ok.params.len(), 1);
        assert!(ok.error.is_none());

        let failed = AuditRecord::failed("db1", "SELECT 1", &[], "timeout", Some(30_000));
        assert_eq!(failed.status, AuditStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("timeout"));
        assert_ne!(failed.id, ok.id);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [AuditStatus::Rejected, AuditStatus::Error, AuditStatus::Success] {
            assert_eq!(status.as_str().parse::<AuditStatus>().unwrap(), status);
        }
        assert!("pending".parse::<AuditStatus>().is_err());
    }
}
