//! Collaborator error types.

use procura_shared::{AppError, ErrorKind};
use thiserror::Error;

/// Errors raised by storage, notification, or lock collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collaborator could not complete the request; callers may retry.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns the error taxonomy kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CollaboratorUnavailable
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        503
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        "COLLABORATOR_UNAVAILABLE"
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}
