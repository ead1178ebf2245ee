//! Application-wide error types.

use serde::Serialize;
use thiserror::Error;

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Classification of domain errors.
///
/// Every module error maps onto exactly one kind, which decides how an
/// outer layer reports it and whether the caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-correctable input problem.
    Validation,
    /// Stale client state or a lost race.
    StateConflict,
    /// A required OTP, evidence file, or remark is missing or wrong.
    Precondition,
    /// A ledger business rule would be violated.
    LedgerIntegrity,
    /// Administrative data is broken (rule gaps or overlaps).
    Configuration,
    /// The referenced entity does not exist.
    NotFound,
    /// The acting user may not perform the action.
    Forbidden,
    /// A storage or notification collaborator failed.
    CollaboratorUnavailable,
}

impl ErrorKind {
    /// Returns true if the caller may retry after refreshing or supplying input.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::StateConflict | Self::Precondition | Self::CollaboratorUnavailable
        )
    }

    /// Returns true if the error signals broken configuration worth alerting on.
    #[must_use]
    pub const fn is_alert(self) -> bool {
        matches!(self, Self::Configuration)
    }
}

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict with current state (e.g., step already decided).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Precondition not met (OTP, evidence, remark).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Business rule violation.
    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    /// Broken administrative configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// External collaborator error.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Access denied.
    #[error("Access denied: {0}")]
    Forbidden(String),
}

impl AppError {
    /// Builds an `AppError` from a domain error kind and message.
    #[must_use]
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::StateConflict => Self::Conflict(message),
            ErrorKind::Precondition => Self::Precondition(message),
            ErrorKind::LedgerIntegrity => Self::BusinessRule(message),
            ErrorKind::Configuration => Self::Configuration(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Forbidden => Self::Forbidden(message),
            ErrorKind::CollaboratorUnavailable => Self::ExternalService(message),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Conflict(_) => 409,
            Self::Precondition(_) => 412,
            Self::BusinessRule(_) => 422,
            Self::Configuration(_) => 500,
            Self::ExternalService(_) => 503,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Precondition(_) => "PRECONDITION_FAILED",
            Self::BusinessRule(_) => "BUSINESS_RULE_VIOLATION",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
