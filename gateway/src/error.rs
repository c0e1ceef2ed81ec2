//! Error types for the gateway
//!
//! Validation and execution problems are reported to callers as structured
//! outcomes; this type covers the collaborator, storage and scan failures.

use guarded_query_core::CoreError;
use std::io;
use thiserror::Error;

/// Result type for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error type for the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cannot reach or authenticate to an external database
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error reported by an external database
    #[error("Database error: {0}")]
    Database(String),

    /// Execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// Statement exceeded its time budget
    #[error("Query timed out after {0} seconds")]
    Timeout(u64),

    /// Secret could not be decrypted
    #[error("Credential error: {0}")]
    Credential(String),

    /// Unknown database, scan or alert
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local persistence error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Scan prerequisite missing or pipeline failure
    #[error("Scan error: {0}")]
    Scan(String),

    /// Language-model rewrite failure
    #[error("Enhancement error: {0}")]
    Enhancement(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Core error
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convert an error into a connection error
pub fn to_connection_error<E: ToString>(err: E) -> GatewayError {
    GatewayError::Connection(err.to_string())
}

/// Convert an error into a database error
pub fn to_database_error<E: ToString>(err: E) -> GatewayError {
    GatewayError::Database(err.to_string())
}

/// Convert an error into a configuration error
pub fn to_config_error<E: ToString>(err: E) -> GatewayError {
    GatewayError::Config(err.to_string())
}

/// Convert an error into a scan error
pub fn to_scan_error<E: ToString>(err: E) -> GatewayError {
    GatewayError::Scan(err.to_string())
}

impl From<tokio_postgres::Error> for GatewayError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => GatewayError::Database(format!("{} ({})", db.message(), db.code().code())),
            None if err.is_closed() => GatewayError::Connection(err.to_string()),
            None => GatewayError::Execution(err.to_string()),
        }
    }
}

impl From<deadpool_postgres::PoolError> for GatewayError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => e.into(),
            other => GatewayError::Connection(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}
