//! Error types shared by the sightline crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the core value types.
#[derive(Error, Debug)]
pub enum Error {
    /// Event document failed to parse as JSON.
    #[error("event parse error: {0}")]
    EventParse(#[from] serde_json::Error),

    /// Timestamp field was missing or not RFC 3339.
    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    /// Indicator type outside the allow-list.
    #[error("unsupported indicator type: {0}")]
    UnsupportedIocType(String),
}
