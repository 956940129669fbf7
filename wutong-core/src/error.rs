//! Session-level errors shared by the controller and its clients.

use crate::provider::ProviderError;
use thiserror::Error;

/// Errors from session operations, local or remote.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Malformed narrative: {0}")]
    MalformedNarrative(String),

    #[error("Invalid session payload: {0}")]
    InvalidPayload(String),

    #[error("Narrative provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    #[error("Could not reach the session server: {0}")]
    Transport(String),

    #[error("Session server error (status {status}): {message}")]
    Remote { status: u16, message: String },
}

impl SessionError {
    /// Whether the caller may retry the same operation unchanged.
    ///
    /// A malformed narrative leaves the record untouched, so resubmitting the
    /// same choice is safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::MalformedNarrative(_) | SessionError::Transport(_) => true,
            SessionError::ProviderUnavailable(err) => err.is_transient(),
            SessionError::Remote { status, .. } => *status >= 500,
            SessionError::NotFound(_) | SessionError::InvalidPayload(_) => false,
        }
    }
}
