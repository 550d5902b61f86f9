use thiserror::Error;

use printforge_auth::AuthzError;
use printforge_core::DomainError;

use crate::store::StoreError;

/// Error returned by every sync engine operation.
///
/// Everything except `PersistenceFailure` is a deterministic, caller-facing
/// rejection; `PersistenceFailure` carries internal detail that must be
/// logged and never shown to clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("invalid {subject} transition: {from} -> {to}")]
    InvalidTransition {
        subject: &'static str,
        from: String,
        to: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("progress regression: current {current}, attempted {attempted}")]
    ProgressRegression { current: u8, attempted: u8 },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Concurrent modification detected at commit; safe to retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl SyncError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Deterministic rejection of the caller's request (logged at `warn`).
    pub fn is_rejection(&self) -> bool {
        !matches!(self, SyncError::PersistenceFailure(_) | SyncError::Gateway(_))
    }
}

impl From<DomainError> for SyncError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => SyncError::Validation(msg),
            DomainError::InvariantViolation(msg) => SyncError::Validation(msg),
            DomainError::InvalidTransition { subject, from, to } => {
                SyncError::InvalidTransition { subject, from, to }
            }
            DomainError::MissingRequiredField(field) => SyncError::MissingRequiredField(field),
            DomainError::ProgressRegression { current, attempted } => {
                SyncError::ProgressRegression { current, attempted }
            }
            DomainError::InvalidId(msg) => SyncError::Validation(msg),
            DomainError::NotFound => SyncError::NotFound("resource".to_string()),
            DomainError::Conflict(msg) => SyncError::Conflict(msg),
            DomainError::Unauthorized => SyncError::Forbidden("unauthorized".to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => SyncError::NotFound(what),
            StoreError::Conflict(msg) => SyncError::Conflict(msg),
            StoreError::Backend(msg) => SyncError::PersistenceFailure(msg),
        }
    }
}

impl From<AuthzError> for SyncError {
    fn from(value: AuthzError) -> Self {
        SyncError::Forbidden(value.to_string())
    }
}
