//! SQLite-backed store
//!
//! One connection guarded by a mutex. The audit table rejects updates and deletes
//! through triggers; alerts cascade with their scan.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guarded_query_core::{AnomalyAlert, AnomalyScan, AuditRecord};
use log::debug;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{AlertFilter, AnomalyStore, AuditLog};
use crate::error::Result;

const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS query_audit_log (
    id TEXT NOT NULL PRIMARY KEY,
    database_id TEXT NOT NULL,
    query_text TEXT NOT NULL,
    params_json TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    error TEXT,
    row_count INTEGER,
    execution_time_ms INTEGER,
    created_at TEXT NOT NULL,
    CHECK (status IN ('rejected', 'error', 'success'))
);

CREATE INDEX IF NOT EXISTS idx_query_audit_log_database
    ON query_audit_log (database_id, created_at);

CREATE TRIGGER IF NOT EXISTS query_audit_log_no_update
BEFORE UPDATE ON query_audit_log
BEGIN
    SELECT RAISE(ABORT, 'query_audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS query_audit_log_no_delete
BEFORE DELETE ON query_audit_log
BEGIN
    SELECT RAISE(ABORT, 'query_audit_log is append-only');
END;

CREATE TABLE IF NOT EXISTS anomaly_scans (
    id TEXT NOT NULL PRIMARY KEY,
    database_id TEXT NOT NULL,
    status TEXT NOT NULL,
    tables_scanned INTEGER NOT NULL DEFAULT 0,
    queries_run INTEGER NOT NULL DEFAULT 0,
    alerts_found INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    CHECK (status IN ('pending', 'running', 'completed', 'failed'))
);

CREATE INDEX IF NOT EXISTS idx_anomaly_scans_database
    ON anomaly_scans (database_id, created_at);

CREATE TABLE IF NOT EXISTS anomaly_alerts (
    id TEXT NOT NULL PRIMARY KEY,
    scan_id TEXT NOT NULL REFERENCES anomaly_scans (id) ON DELETE CASCADE,
    database_id TEXT NOT NULL,
    severity TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    description TEXT NOT NULL,
    detail TEXT NOT NULL,
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    current_value REAL NOT NULL,
    previous_value REAL NOT NULL,
    change_percent REAL NOT NULL,
    query_used TEXT NOT NULL,
    seen INTEGER NOT NULL DEFAULT 0,
    dismissed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    CHECK (severity IN ('info', 'warning', 'critical'))
);

CREATE INDEX IF NOT EXISTS idx_anomaly_alerts_database
    ON anomaly_alerts (database_id, created_at);
"#;

const AUDIT_COLUMNS: &str =
    "id, database_id, query_text, params_json, status, error, row_count, execution_time_ms, created_at";

const SCAN_COLUMNS: &str = "id, database_id, status, tables_scanned, queries_run, alerts_found, error, \
     created_at, started_at, completed_at";

const ALERT_COLUMNS: &str = "id, scan_id, database_id, severity, metric_name, description, detail, \
     table_name, column_name, current_value, previous_value, change_percent, query_used, seen, \
     dismissed, created_at";

/// SQLite implementation of the audit log and anomaly store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at `path`; `:memory:` opens a private in-memory store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        debug!("Opened store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Open a private in-memory store
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let params_json = serde_json::to_string(&record.params)?;
        self.conn().execute(
            &format!("INSERT INTO query_audit_log ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)", AUDIT_COLUMNS),
            params![
                record.id.to_string(),
                record.database_id,
                record.query_text,
                params_json,
                record.status.as_str(),
                record.error,
                record.row_count.map(|n| n as i64),
                record.execution_time_ms.map(|n| n as i64),
                record.created_at,
            ],
        )?;
        Ok(())
    }

    async fn recent_audit(&self, database_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM query_audit_log WHERE database_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            AUDIT_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![database_id, limit as i64], audit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

#[async_trait]
impl AnomalyStore for SqliteStore {
    async fn create_scan(&self, scan: &AnomalyScan) -> Result<()> {
        self.conn().execute(
            &format!("INSERT INTO anomaly_scans ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", SCAN_COLUMNS),
            params![
                scan.id.to_string(),
                scan.database_id,
                scan.status.as_str(),
                scan.tables_scanned,
                scan.queries_run,
                scan.alerts_found,
                scan.error,
                scan.created_at,
                scan.started_at,
                scan.completed_at,
            ],
        )?;
        Ok(())
    }

    async fn update_scan(&self, scan: &AnomalyScan) -> Result<()> {
        self.conn().execute(
            "UPDATE anomaly_scans SET status = ?2, tables_scanned = ?3, queries_run = ?4, alerts_found = ?5, \
             error = ?6, started_at = ?7, completed_at = ?8 WHERE id = ?1",
            params![
                scan.id.to_string(),
                scan.status.as_str(),
                scan.tables_scanned,
                scan.queries_run,
                scan.alerts_found,
                scan.error,
                scan.started_at,
                scan.completed_at,
            ],
        )?;
        Ok(())
    }

    async fn get_scan(&self, scan_id: Uuid) -> Result<Option<AnomalyScan>> {
        let scan = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM anomaly_scans WHERE id = ?1", SCAN_COLUMNS),
                params![scan_id.to_string()],
                scan_from_row,
            )
            .optional()?;
        Ok(scan)
    }

    async fn latest_scan(&self, database_id: &str) -> Result<Option<AnomalyScan>> {
        let scan = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM anomaly_scans WHERE database_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    SCAN_COLUMNS
                ),
                params![database_id],
                scan_from_row,
            )
            .optional()?;
        Ok(scan)
    }

    async fn delete_scan(&self, scan_id: Uuid) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM anomaly_scans WHERE id = ?1", params![scan_id.to_string()])?;
        Ok(deleted > 0)
    }

    async fn insert_alert(&self, alert: &AnomalyAlert) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO anomaly_alerts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                ALERT_COLUMNS
            ),
            params![
                alert.id.to_string(),
                alert.scan_id.to_string(),
                alert.database_id,
                alert.severity.as_str(),
                alert.metric_name,
                alert.description,
                alert.detail,
                alert.table_name,
                alert.column_name,
                alert.current_value,
                alert.previous_value,
                alert.change_percent,
                alert.query_used,
                alert.seen,
                alert.dismissed,
                alert.created_at,
            ],
        )?;
        Ok(())
    }

    async fn list_alerts(&self, database_id: &str, filter: AlertFilter) -> Result<Vec<AnomalyAlert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM anomaly_alerts WHERE database_id = ?1 AND (?2 OR dismissed = 0) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
            ALERT_COLUMNS
        ))?;
        let alerts = stmt
            .query_map(
                params![database_id, filter.include_dismissed, filter.limit as i64],
                alert_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    async fn alerts_for_scan(&self, scan_id: Uuid) -> Result<Vec<AnomalyAlert>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM anomaly_alerts WHERE scan_id = ?1 ORDER BY rowid",
            ALERT_COLUMNS
        ))?;
        let alerts = stmt
            .query_map(params![scan_id.to_string()], alert_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    async fn mark_seen(&self, alert_ids: &[Uuid]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE anomaly_alerts SET seen = 1 WHERE id = ?1")?;
            for id in alert_ids {
                updated += stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    async fn dismiss(&self, alert_id: Uuid) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE anomaly_alerts SET dismissed = 1 WHERE id = ?1",
            params![alert_id.to_string()],
        )?;
        Ok(updated > 0)
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn count_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|n| n.max(0) as u64))
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let params_json: String = row.get(3)?;
    let params = serde_json::from_str(&params_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(AuditRecord {
        id: parse_column(row, 0)?,
        database_id: row.get(1)?,
        query_text: row.get(2)?,
        params,
        status: parse_column(row, 4)?,
        error: row.get(5)?,
        row_count: count_column(row, 6)?,
        execution_time_ms: count_column(row, 7)?,
        created_at: row.get::<_, DateTime<Utc>>(8)?,
    })
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<AnomalyScan> {
    Ok(AnomalyScan {
        id: parse_column(row, 0)?,
        database_id: row.get(1)?,
        status: parse_column(row, 2)?,
        tables_scanned: row.get(3)?,
        queries_run: row.get(4)?,
        alerts_found: row.get(5)?,
        error: row.get(6)?,
        created_at: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<AnomalyAlert> {
    Ok(AnomalyAlert {
        id: parse_column(row, 0)?,
        scan_id: parse_column(row, 1)?,
        database_id: row.get(2)?,
        severity: parse_column(row, 3)?,
        metric_name: row.get(4)?,
        description: row.get(5)?,
        detail: row.get(6)?,
        table_name: row.get(7)?,
        column_name: row.get(8)?,
        current_value: row.get(9)?,
        previous_value: row.get(10)?,
        change_percent: row.get(11)?,
        query_used: row.get(12)?,
        seen: row.get(13)?,
        dismissed: row.get(14)?,
        created_at: row.get(15)?,
    })
}
