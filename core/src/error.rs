//! Error types for the core crate
//!
//! This module provides a consolidated error type for the core crate.

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// UUID error
    #[error("UUID error: {0}")]
    UuidError(#[from] uuid::Error),
}

/// Result type for the core crate
pub type Result<T> = std::result::Result<T, CoreError>;

/// Convert a string error to an InvalidStateTransition
pub fn to_state_error<E: std::fmt::Display>(err: E) -> CoreError {
    CoreError::InvalidStateTransition(err.to_string())
}

/// Convert a string error to a Validation error
pub fn to_validation_error<E: std::fmt::Display>(err: E) -> CoreError {
    CoreError::Validation(err.to_string())
}
