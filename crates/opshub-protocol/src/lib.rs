//! Ops Hub protocol - document types and path layout
//!
//! Describes the documents the vote aggregator reads and writes in the
//! realtime store: votable items carrying denormalized up/down counters and
//! per-user vote records, plus the caller identity and admin policy.

pub mod identity;
pub mod types;
pub mod error;
pub mod constants;
pub mod paths;

pub use identity::*;
pub use types::*;
pub use error::*;
pub use constants::*;
