use opshub_protocol::{ItemId, ProtocolError};
use opshub_store::StoreError;
use thiserror::Error;

/// Errors returned by the vote aggregator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VoteError {
    #[error("voting requires a signed-in user")]
    Unauthenticated,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("item {0} does not exist")]
    NotFound(ItemId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("counters of {item} were updated but the vote record write failed: {source}")]
    PartialWrite { item: ItemId, source: StoreError },

    #[error("malformed item: {0}")]
    MalformedItem(String),
}

/// Broad class of a [`VoteError`], used to pick the user-facing reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller must sign in or fix its request.
    Caller,
    /// The item is gone; refresh the listing.
    NotFound,
    /// Connectivity or contention; the user may try again.
    Transient,
    /// Counters and vote record are out of step.
    PartialWrite,
}

impl VoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoteError::Unauthenticated | VoteError::InvalidKey(_) => ErrorKind::Caller,
            VoteError::NotFound(_) => ErrorKind::NotFound,
            VoteError::Store(e) if e.is_transient() => ErrorKind::Transient,
            VoteError::Store(_) => ErrorKind::Caller,
            VoteError::PartialWrite { .. } => ErrorKind::PartialWrite,
            VoteError::MalformedItem(_) => ErrorKind::NotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<ProtocolError> for VoteError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidKey(key) => VoteError::InvalidKey(key),
            other @ ProtocolError::MalformedDocument { .. } => VoteError::MalformedItem(other.to_string()),
        }
    }
}
