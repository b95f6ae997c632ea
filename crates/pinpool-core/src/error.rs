//! Error types for pinpool

use std::time::Duration;

use thiserror::Error;

/// Error type for pool and driver operations
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool stayed saturated for the whole acquisition window.
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    /// Acquisition attempted during or after `close()`.
    #[error("Connection pool is closing")]
    PoolClosing,

    /// The native driver rejected a statement.
    #[error("Statement error: {0}")]
    Statement(String),

    /// A native connection could not be opened or initialized.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A rollback issued after a failed transaction callback itself failed.
    #[error("Rollback error: {0}")]
    Rollback(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PoolError {
    /// Whether retrying the same call later can reasonably succeed.
    ///
    /// Only pool saturation qualifies; an API boundary maps it to a
    /// "service unavailable, try again" response.
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::AcquireTimeout(_))
    }

    /// A message safe to show to an external caller.
    ///
    /// Never includes native driver text.
    pub fn public_message(&self) -> &'static str {
        match self {
            PoolError::AcquireTimeout(_) => "The service is busy, please try again",
            PoolError::PoolClosing => "The service is shutting down",
            PoolError::Configuration(_) => "The service is misconfigured",
            _ => "An internal database error occurred",
        }
    }
}

/// Result type alias for pinpool operations
pub type Result<T> = std::result::Result<T, PoolError>;
