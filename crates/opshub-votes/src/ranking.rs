//! Listing order for votable items.

use std::cmp::Reverse;

use opshub_protocol::{VotableItem, VoteCounters};
use serde::{Deserialize, Serialize};

/// Net score shown next to the vote arrows.
pub fn score(counters: &VoteCounters) -> i64 {
    counters.upvote_count as i64 - counters.downvote_count as i64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    #[serde(alias = "votes")]
    MostVoted,
}

/// Sort in place. `MostVoted` breaks score ties by recency; items without a
/// creation time sort last.
pub fn sort_items(items: &mut [VotableItem], order: SortOrder) {
    let recency = |item: &VotableItem| Reverse(item.created_at_millis().unwrap_or(i64::MIN));
    match order {
        SortOrder::Newest => items.sort_by_key(|item| recency(item)),
        SortOrder::MostVoted => items.sort_by_key(|item| (Reverse(score(&item.counters)), recency(item))),
    }
}
