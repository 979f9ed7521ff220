//! Error types for data API calls.
//!
//! Every variant is recoverable from the engine's point of view: a failed
//! mutation is rolled back and a failed fetch leaves the last known state.

use thiserror::Error;

/// Error type for all data API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network or transport-level HTTP error from reqwest.
    ///
    /// Includes connection failures, timeouts, and TLS errors.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Supabase returned a non-success HTTP status.
    #[error("Supabase error: {status} - {message}")]
    Supabase {
        /// The HTTP status code returned by Supabase.
        status: u16,
        /// The response body, typically containing error details.
        message: String,
    },

    /// Response body did not match the expected schema.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response was well-formed HTTP but unusable (e.g. missing count header).
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No access token / user has been set on the client.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Configuration or initialization error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience Result type alias for data API operations.
pub type ApiResult<T> = Result<T, ApiError>;
