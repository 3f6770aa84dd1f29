//! # Cache Error Types
//!
//! Error types for cache lookups, transfers, and eviction.

use bridge_traits::BridgeError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    // ========================================================================
    // Input Errors
    // ========================================================================
    /// The identifier is not an absolute URL.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A configuration value was rejected.
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Transfer Errors
    // ========================================================================
    /// The source could not be opened or failed mid-transfer.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// No bytes arrived from the source within the stall timeout.
    #[error("Transfer stalled: no data for {0:?}")]
    Stalled(Duration),

    /// The source closed before delivering its advertised length.
    #[error("Transfer incomplete: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: u64 },

    /// The transfer was cancelled by dropping its stream.
    #[error("Transfer cancelled")]
    Cancelled,

    // ========================================================================
    // Platform Errors
    // ========================================================================
    /// A bridge (file system or HTTP) operation failed.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Runtime configuration error.
    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::TransferFailed(_)
            | CacheError::Stalled(_)
            | CacheError::Incomplete { .. } => true,
            CacheError::Bridge(BridgeError::HttpStatus { status, .. }) => *status >= 500,
            CacheError::Bridge(BridgeError::OperationFailed(_)) => true,
            _ => false,
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
