//! Error types for the bridge.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bridging the EDR and the intel platform.
#[derive(Error, Debug)]
pub enum Error {
    /// Core model error.
    #[error(transparent)]
    Core(#[from] sightline_core::Error),

    /// HTTP transport error (refused, reset, DNS, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Websocket transport error.
    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A collaborator answered with an unexpected HTTP status.
    ///
    /// Protocol-level, distinct from transport failure; surfaced to the
    /// caller of the specific operation.
    #[error("unexpected HTTP status: {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    /// A collaborator answered 200 but flagged an application error.
    #[error("API error: {0}")]
    Api(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
