//! Error types for the sync layer.

use tether_future::FutureError;

/// Errors that can occur in the sync layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A payload was not valid JSON or lacked a required field.
    #[error("invalid sync payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A remote call named a method the table does not have.
    #[error("unknown remote method {0:?}")]
    UnknownMethod(String),

    /// A remote call did not name a method at all.
    #[error("remote call without a method name")]
    MissingMethod,

    /// The client did not reply before the reply timeout.
    #[error("no reply within {0} ms")]
    TimedOut(i64),

    /// The request was canceled or rejected below the sync layer.
    #[error(transparent)]
    Future(#[from] FutureError),

    /// The application's responder failed.
    #[error("responder failed: {0}")]
    Responder(String),
}

impl SyncError {
    /// Shorthand for `SyncError::Responder(reason.into())`.
    pub fn responder(reason: impl Into<String>) -> Self {
        Self::Responder(reason.into())
    }
}
