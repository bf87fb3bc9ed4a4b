//! Typed views over raw store subscriptions.

use std::collections::BTreeMap;

use opshub_protocol::{Ballot, ItemId, UserVote, VotableItem};
use opshub_store::Subscription;
use serde_json::Value;

/// Live map of the items a user has voted on.
///
/// Every emission is the complete replacement map; an empty map means the
/// user holds no votes.
#[derive(Debug)]
pub struct UserVotesSubscription {
    inner: Subscription,
}

impl UserVotesSubscription {
    pub(crate) fn new(inner: Subscription) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> Option<BTreeMap<ItemId, Ballot>> {
        let snapshot = self.inner.next().await?;
        Some(materialize_votes(&snapshot.path, snapshot.value.as_ref()))
    }

    pub fn unsubscribe(self) {
        self.inner.unsubscribe();
    }
}

/// Build the `item -> ballot` map from the raw subtree of one user.
pub fn materialize_votes(path: &str, value: Option<&Value>) -> BTreeMap<ItemId, Ballot> {
    let mut votes = BTreeMap::new();
    let Some(value) = value else {
        return votes;
    };
    let Some(entries) = value.as_object() else {
        tracing::warn!(path = %path, "Vote subtree is not an object");
        return votes;
    };
    for (item, record) in entries {
        match serde_json::from_value::<UserVote>(record.clone()) {
            Ok(vote) => {
                votes.insert(ItemId::new(item.clone()), vote.ballot);
            }
            Err(e) => {
                tracing::warn!(path = %path, item = %item, error = %e, "Skipping malformed vote record");
            }
        }
    }
    votes
}

/// Live snapshot of one item. Emits `None` while the item does not exist.
#[derive(Debug)]
pub struct ItemSubscription {
    item: ItemId,
    inner: Subscription,
}

impl ItemSubscription {
    pub(crate) fn new(item: ItemId, inner: Subscription) -> Self {
        Self { item, inner }
    }

    pub fn item(&self) -> &ItemId {
        &self.item
    }

    /// Next snapshot. Outer `None` means the subscription has ended.
    pub async fn next(&mut self) -> Option<Option<VotableItem>> {
        loop {
            let snapshot = self.inner.next().await?;
            let Some(doc) = snapshot.value else {
                return Some(None);
            };
            match VotableItem::from_document(self.item.clone(), &snapshot.path, &doc) {
                Ok(item) => return Some(Some(item)),
                Err(e) => {
                    tracing::warn!(item = %self.item, error = %e, "Skipping malformed item snapshot");
                }
            }
        }
    }

    pub fn unsubscribe(self) {
        self.inner.unsubscribe();
    }
}
