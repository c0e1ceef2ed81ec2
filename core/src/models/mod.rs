//! Data models for the guarded query gateway
//!
//! This module contains the records exchanged between the validator, the executor
//! and the anomaly scan engine, and the records they persist.

pub mod alert;
pub mod audit;
pub mod authorization;
pub mod connection;
pub mod scan;
pub mod schema;
pub mod validation;

pub use alert::{AnomalyAlert, Severity};
pub use audit::{AuditRecord, AuditStatus};
pub use authorization::AuthorizationContext;
pub use connection::{ConnectionDescriptor, Dialect, Secret, StoredConnection};
pub use scan::{AnomalyScan, ScanStatus};
pub use schema::{ColumnSchema, MetricCandidate, SchemaSnapshot, TableSchema};
pub use validation::QueryValidation;
