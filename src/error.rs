//! Error types for Parlance
//!
//! This module defines all error types used throughout the library,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Parlance operations
///
/// This enum encompasses all possible errors that can occur while
/// loading configuration, talking to the reply service, persisting
/// records, and driving a streamed reply.
#[derive(Error, Debug)]
pub enum ParlanceError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structured error reported by the reply service.
    ///
    /// Carries the service's own error text verbatim so it can be surfaced
    /// to the user word for word (e.g. `{"error": "rate limited"}` becomes
    /// `"rate limited"`).
    #[error("{0}")]
    Service(String),

    /// Record store errors (database operations, closed subscriptions)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Errors in the streamed reply transport itself
    #[error("Stream error: {0}")]
    Stream(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors (connection, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Parlance operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
