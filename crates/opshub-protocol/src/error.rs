use thiserror::Error;

/// Errors raised while interpreting store documents and keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error("malformed document at {path}: {reason}")]
    MalformedDocument { path: String, reason: String },
}
