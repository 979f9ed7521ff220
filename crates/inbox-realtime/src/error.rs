//! Realtime error types.

use thiserror::Error;

/// Realtime error type.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server refused the channel join.
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    /// The server reported an error on an established channel.
    #[error("Channel error: {0}")]
    Channel(String),

    /// The connection closed before or after the join.
    #[error("Channel closed")]
    ChannelClosed,

    /// Subscribe did not complete in time.
    #[error("Operation timed out")]
    Timeout,

    /// Realtime endpoint could not be derived from the project URL.
    #[error("Invalid realtime URL: {0}")]
    InvalidUrl(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using RealtimeError.
pub type RealtimeResult<T> = Result<T, RealtimeError>;
