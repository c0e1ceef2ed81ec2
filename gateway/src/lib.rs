//! Guarded Query Gateway
//!
//! This crate runs read-only SQL against external databases on behalf of an
//! orchestration layer: every statement is validated, capped and audited, and
//! period-over-period anomaly scans run through the same guarded path.

// Error types and result
pub mod error;
pub use error::{GatewayError, Result};

// Configuration
pub mod config;
pub use config::GatewayConfig;

// Collaborators and their static implementations
pub mod catalog;
pub mod collaborators;
pub mod vault;
pub use catalog::{CatalogEntry, StaticCatalog};
pub use collaborators::{ConnectionDirectory, CredentialVault, PermissionStore, SchemaCache};
pub use vault::EnvCredentialVault;

// Guarded execution
pub mod executor;
pub use executor::{ExecutionOutcome, ExecutorConfig, GuardedExecutor, QueryResult};

// Local persistence
pub mod store;
pub use store::{AlertFilter, AnomalyStore, AuditLog, SqliteStore};

// Anomaly scans
pub mod anomaly;
pub use anomaly::{ScanConfig, ScanEngine, ScanFailure, ScanReport, ScanWorker};

// Inbound facade
pub mod gateway;
pub use gateway::{Collaborators, GatewayStatus, QueryGateway};

/// Version of the gateway crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
