//! Error types for the Tollgate service.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Redis connection or command errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Failure of a single bucket store operation.
///
/// These never reach an RPC caller: the guard turns every variant into a
/// fail-open decision.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command
    #[error("backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// The operation did not finish within its time budget
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with something other than a bucket reply
    #[error("unexpected store reply: {0}")]
    Reply(String),
}
