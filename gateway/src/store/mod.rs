//! Persisted state owned by the gateway
//!
//! The audit log is append-only. Scans and alerts are mutable only through the
//! lifecycle and flag operations exposed here.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use guarded_query_core::{AnomalyAlert, AnomalyScan, AuditRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Default number of alerts returned by a listing
pub const DEFAULT_ALERT_LIMIT: usize = 50;

/// Append-only record of every execution attempt
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append a record
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    /// Most recent records for a database, newest first
    async fn recent_audit(&self, database_id: &str, limit: usize) -> Result<Vec<AuditRecord>>;
}

/// Alert listing options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    /// Include dismissed alerts
    pub include_dismissed: bool,

    /// Maximum alerts returned
    pub limit: usize,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            include_dismissed: false,
            limit: DEFAULT_ALERT_LIMIT,
        }
    }
}

/// Scan and alert records
#[async_trait]
pub trait AnomalyStore: Send + Sync {
    /// Insert a new scan
    async fn create_scan(&self, scan: &AnomalyScan) -> Result<()>;

    /// Persist the current state and counters of a scan
    async fn update_scan(&self, scan: &AnomalyScan) -> Result<()>;

    /// Get a scan by id
    async fn get_scan(&self, scan_id: Uuid) -> Result<Option<AnomalyScan>>;

    /// Most recently created scan for a database
    async fn latest_scan(&self, database_id: &str) -> Result<Option<AnomalyScan>>;

    /// Delete a scan and, by cascade, its alerts
    async fn delete_scan(&self, scan_id: Uuid) -> Result<bool>;

    /// Insert an alert tied to an existing scan
    async fn insert_alert(&self, alert: &AnomalyAlert) -> Result<()>;

    /// Alerts for a database, newest first
    async fn list_alerts(&self, database_id: &str, filter: AlertFilter) -> Result<Vec<AnomalyAlert>>;

    /// Alerts produced by one scan
    async fn alerts_for_scan(&self, scan_id: Uuid) -> Result<Vec<AnomalyAlert>>;

    /// Flag alerts as seen, returning how many exist
    async fn mark_seen(&self, alert_ids: &[Uuid]) -> Result<usize>;

    /// Flag an alert as dismissed, returning whether it exists
    async fn dismiss(&self, alert_id: Uuid) -> Result<bool>;
}
