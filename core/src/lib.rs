//! # Guarded Query Core
//!
//! Core data structures and the SQL guardrail validator for the guarded query gateway.
//! Everything in this crate is pure: no connections, no files, no async runtime.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod guardrail;
pub mod models;
pub mod utils;

/// Re-export common types for ease of use
pub use error::{CoreError, Result};
pub use guardrail::{enforce_limit, validate, GuardrailConfig, SqlGuardrail};
pub use models::{
    AnomalyAlert, AnomalyScan, AuditRecord, AuditStatus, AuthorizationContext, ColumnSchema,
    ConnectionDescriptor, Dialect, MetricCandidate, QueryValidation, ScanStatus, SchemaSnapshot,
    Secret, Severity, StoredConnection, TableSchema,
};

/// Version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
