//! Error handling for the recovery pipeline
//!
//! Provides centralized error types using thiserror. Components return
//! classified results rather than panicking; the orchestrator is the only
//! place that translates a component error into a state transition.

use thiserror::Error;

/// Main error type for recovery operations
#[derive(Error, Debug)]
pub enum RecoveryError {
    /// IO errors (device open/read, filesystem operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// External command errors (spawn failure, pipe failure)
    #[error("Command error: {0}")]
    Command(String),

    /// State errors (invalid orchestrator transition, poisoned lock)
    #[error("State error: {0}")]
    State(String),

    /// Validation errors (passphrase length, argument checks)
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

impl RecoveryError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an external command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
