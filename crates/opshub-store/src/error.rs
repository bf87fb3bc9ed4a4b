use thiserror::Error;

/// Errors surfaced by a document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied writing {path}")]
    PermissionDenied { path: String },

    #[error("transaction on {path} gave up after {attempts} conflicting attempts")]
    TooManyRetries { path: String, attempts: u32 },

    #[error("invalid path '{0}'")]
    InvalidPath(String),
}

impl StoreError {
    /// Whether the caller may reasonably try the same call again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::TooManyRetries { .. })
    }
}
