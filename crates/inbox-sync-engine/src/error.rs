//! Error types for the sync engine.

use inbox_data_api::ApiError;
use thiserror::Error;

/// Errors returned to callers of the inbox.
///
/// Only mutations and explicit fetches return errors. Stream and
/// subscription failures are logged and retried, never returned.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server call failed; any optimistic change has been rolled back.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// No session: call `login` first.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The mutation worker stopped before the intent settled.
    #[error("Mutation queue closed")]
    QueueClosed,
}

pub type SyncResult<T> = Result<T, SyncError>;
