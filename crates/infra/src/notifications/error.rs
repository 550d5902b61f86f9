use thiserror::Error;

use printforge_auth::CsrfError;
use printforge_core::DomainError;

use super::types::NotificationType;
use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Neither a valid worker key nor an authenticated user session.
    #[error("not authenticated")]
    Unauthenticated,

    #[error("csrf validation failed: {0}")]
    Csrf(#[from] CsrfError),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid process token format")]
    InvalidToken,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{notification_type} notifications cannot be disabled")]
    CriticalPreference { notification_type: NotificationType },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl DispatchError {
    pub fn is_rejection(&self) -> bool {
        !matches!(self, DispatchError::PersistenceFailure(_))
    }
}

impl From<StoreError> for DispatchError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => DispatchError::NotFound(what),
            StoreError::Conflict(msg) | StoreError::Backend(msg) => {
                DispatchError::PersistenceFailure(msg)
            }
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::Validation(value.to_string())
    }
}
