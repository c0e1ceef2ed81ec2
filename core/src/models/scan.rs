//! Anomaly scan lifecycle
//!
//! A scan moves `pending -> running -> completed | failed`. The terminal state and
//! its timestamp are set exactly once; any other transition is an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{to_state_error, to_validation_error, CoreError, Result};

/// State of an anomaly scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Created, not started
    Pending,

    /// Pipeline in progress
    Running,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,
}

impl ScanStatus {
    /// Get the status tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(to_validation_error(format!("unknown scan status '{}'", other))),
        }
    }
}

/// One execution of the anomaly pipeline against a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScan {
    /// Scan id
    pub id: Uuid,

    /// Database being scanned
    pub database_id: String,

    /// Current state
    pub status: ScanStatus,

    /// Distinct tables that produced at least one usable comparison
    pub tables_scanned: u32,

    /// Comparison queries synthesized
    pub queries_run: u32,

    /// Alerts persisted
    pub alerts_found: u32,

    /// Failure reason
    pub error: Option<String>,

    /// When the scan was created
    pub created_at: DateTime<Utc>,

    /// When the scan started running
    pub started_at: Option<DateTime<Utc>>,

    /// When the scan reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnomalyScan {
    /// Create a pending scan
    pub fn new(database_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            database_id: database_id.into(),
            status: ScanStatus::Pending,
            tables_scanned: 0,
            queries_run: 0,
            alerts_found: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// `pending -> running`
    pub fn begin(&mut self) -> Result<()> {
        if self.status != ScanStatus::Pending {
            return Err(to_state_error(format!(
                "scan {} cannot start from {}",
                self.id, self.status
            )));
        }
        self.status = ScanStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `running -> completed`
    pub fn complete(&mut self, tables_scanned: u32, queries_run: u32, alerts_found: u32) -> Result<()> {
        self.finish(ScanStatus::Completed)?;
        self.tables_scanned = tables_scanned;
        self.queries_run = queries_run;
        self.alerts_found = alerts_found;
        Ok(())
    }

    /// `running -> failed`
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.finish(ScanStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    fn finish(&mut self, terminal: ScanStatus) -> Result<()> {
        if self.status != ScanStatus::Running {
            return Err(to_state_error(format!(
                "scan {} cannot move from {} to {}",
                self.id, self.status, terminal
            )));
        }
        self.status = terminal;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_lifecycle() {
        let mut scan = AnomalyScan::new("db1");
        assert_eq!(scan.status, ScanStatus::Pending);
        assert!(scan.started_at.is_none());

        scan.begin().unwrap();
        assert_eq!(scan.status, ScanStatus::Running);
        assert!(scan.started_at.is_some());

        scan.complete(2, 4, 1).unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!((scan.tables_scanned, scan.queries_run, scan.alerts_found), (2, 4, 1));
        assert!(scan.completed_at.is_some());
        assert!(scan.status.is_terminal());
    }

    #[test]
    fn test_terminal_state_set_once() {
        let mut scan = AnomalyScan::new("db1");
        scan.begin().unwrap();
        scan.fail("No cached schema").unwrap();
        let completed_at = scan.completed_at;

        assert!(scan.complete(1, 1, 1).is_err());
        assert!(scan.fail("again").is_err());
        assert!(scan.begin().is_err());
        assert_eq!(scan.status, ScanStatus::Failed);
        assert_eq!(scan.error.as_deref(), Some("No cached schema"));
        assert_eq!(scan.completed_at, completed_at);
    }

    #[test]
    fn test_cannot_finish_before_running() {
        let mut scan = AnomalyScan::new("db1");
        assert!(scan.complete(0, 0, 0).is_err());
        assert!(scan.fail("nope").is_err());
        assert_eq!(scan.status, ScanStatus::Pending);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("running".parse::<ScanStatus>().unwrap(), ScanStatus::Running);
        assert!("done".parse::<ScanStatus>().is_err());
    }
}
