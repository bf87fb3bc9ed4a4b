//! Ops Hub voting - one active ballot per user and item, with denormalized
//! up/down counters kept on the item.
//!
//! A vote goes through two store writes:
//! 1. a transaction on the item that reads the caller's entry in the item's
//!    voters map, applies the counter deltas and rewrites that entry
//! 2. a plain write (or delete) of the caller's vote record, the per-user
//!    index behind `user_votes` and its subscription
//!
//! The second write only runs once the first has committed. If it fails the
//! item counters and the vote record disagree until a later vote or an
//! offline reconciliation fixes them; this surfaces as
//! [`VoteError::PartialWrite`] and is not compensated here.

pub mod aggregator;
pub mod error;
pub mod ranking;
pub mod subscriptions;
pub mod transition;

pub use aggregator::{VoteAggregator, VoteConfig, VoteOutcome};
pub use error::{ErrorKind, VoteError};
pub use ranking::{score, sort_items, SortOrder};
pub use subscriptions::{materialize_votes, ItemSubscription, UserVotesSubscription};
pub use transition::{held_ballot, tally_document, transition, Transition};
