use std::time::Duration;

/// Failures reported by the API store.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    /// Stale version token on update.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Rejected by validation, e.g. an immutable field changed.
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("already_exists: {0}")]
    AlreadyExists(String),
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("malformed object: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Update failures that call for delete-then-recreate instead of a hard error.
    pub fn needs_recreate(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Invalid(_))
    }
}
