//! Vote aggregator: applies a user's click to the item counters and the
//! user's vote record.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opshub_protocol::{
    paths, Ballot, ItemId, ProtocolError, UserId, UserVote, VotableItem, VoteCounters,
    DEFAULT_ITEMS_ROOT, DEFAULT_USER_VOTES_ROOT,
};
use opshub_store::{DocumentStore, StoreError, TxDecision};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::subscriptions::{materialize_votes, ItemSubscription, UserVotesSubscription};
use crate::transition::{held_ballot, tally_document, transition, Transition};
use crate::VoteError;

/// Where the aggregator keeps its documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteConfig {
    /// Collection holding votable items.
    pub items_root: String,
    /// Collection holding per-user vote records.
    pub user_votes_root: String,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            items_root: DEFAULT_ITEMS_ROOT.to_string(),
            user_votes_root: DEFAULT_USER_VOTES_ROOT.to_string(),
        }
    }
}

/// Result of a committed vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub item: ItemId,
    /// Ballot held before the click.
    pub previous: Option<Ballot>,
    /// Ballot held now; `None` after a withdrawal.
    pub current: Option<Ballot>,
    /// Item counters as committed by this vote.
    pub counters: VoteCounters,
}

/// Rounds spent bringing a vote record in line with the item before giving
/// up and leaving it to the user's next vote.
const MAX_RECORD_SYNC_ROUNDS: usize = 8;

pub struct VoteAggregator {
    store: Arc<dyn DocumentStore>,
    config: VoteConfig,
}

impl VoteAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, config: VoteConfig) -> Self {
        Self { store, config }
    }

    /// Apply `requested` for `user` on `item`.
    ///
    /// The ballot the user holds is read from the item's voters map inside
    /// the same transaction that moves the counters, so concurrent clicks,
    /// including repeated clicks by one user, always match some serial
    /// order. The per-user vote record is an index written afterwards, and
    /// only if the item still exists.
    pub async fn apply_vote(
        &self,
        user: &UserId,
        item: &ItemId,
        requested: Ballot,
    ) -> Result<VoteOutcome, VoteError> {
        if user.is_anonymous() {
            tracing::warn!(item = %item, "Rejected vote from anonymous caller");
            return Err(VoteError::Unauthenticated);
        }
        let item_path = paths::item_path(&self.config.items_root, item)?;
        let vote_path = paths::user_vote_path(&self.config.user_votes_root, user, item)?;

        // Items written before the voters map existed only know the ballot
        // through the user's record.
        let recorded = self.read_ballot(&vote_path).await?;

        let applied: Mutex<Option<Transition>> = Mutex::new(None);
        let malformed: Mutex<Option<ProtocolError>> = Mutex::new(None);
        let update = |doc: Option<&Value>| {
            let Some(doc) = doc else {
                return TxDecision::Abort;
            };
            let current = held_ballot(doc, user).unwrap_or(recorded);
            let step = transition(current, requested);
            match tally_document(&item_path, doc, user, &step) {
                Ok(next) => {
                    *lock(&applied) = Some(step);
                    TxDecision::Set(next)
                }
                Err(e) => {
                    *lock(&malformed) = Some(e);
                    TxDecision::Abort
                }
            }
        };

        let commit = self.store.transaction(&item_path, &update).await?;
        let step = match (commit.committed, into_inner(applied)) {
            (true, Some(step)) => step,
            _ => {
                if let Some(e) = into_inner(malformed) {
                    tracing::warn!(item = %item, error = %e, "Vote aborted on malformed item");
                    return Err(e.into());
                }
                tracing::info!(item = %item, user = %user, "Vote aborted, item no longer exists");
                return Err(VoteError::NotFound(item.clone()));
            }
        };

        let counters = match &commit.snapshot {
            Some(doc) => VoteCounters::from_document(&item_path, doc)?,
            None => VoteCounters::default(),
        };

        if let Err(source) = self.sync_record(user, &item_path, &vote_path, step.to).await {
            tracing::error!(
                item = %item,
                user = %user,
                error = %source,
                "Vote counters committed but vote record write failed"
            );
            return Err(VoteError::PartialWrite {
                item: item.clone(),
                source,
            });
        }

        tracing::info!(
            item = %item,
            user = %user,
            previous = ?step.from,
            current = ?step.to,
            withdrawn = step.is_withdrawal(),
            upvotes = counters.upvote_count,
            downvotes = counters.downvote_count,
            attempts = commit.attempts,
            "Vote applied"
        );

        Ok(VoteOutcome {
            item: item.clone(),
            previous: step.from,
            current: step.to,
            counters,
        })
    }

    /// Ballot `user` currently holds on `item`.
    pub async fn current_ballot(&self, user: &UserId, item: &ItemId) -> Result<Option<Ballot>, VoteError> {
        if user.is_anonymous() {
            return Ok(None);
        }
        let item_path = paths::item_path(&self.config.items_root, item)?;
        if let Some(held) = self
            .store
            .read(&item_path)
            .await?
            .and_then(|doc| held_ballot(&doc, user))
        {
            return Ok(held);
        }
        let vote_path = paths::user_vote_path(&self.config.user_votes_root, user, item)?;
        self.read_ballot(&vote_path).await
    }

    /// One-shot read of everything `user` has voted on.
    pub async fn user_votes(&self, user: &UserId) -> Result<BTreeMap<ItemId, Ballot>, VoteError> {
        if user.is_anonymous() {
            return Err(VoteError::Unauthenticated);
        }
        let path = paths::user_votes_path(&self.config.user_votes_root, user)?;
        let raw = self.store.read(&path).await?;
        Ok(materialize_votes(&path, raw.as_ref()))
    }

    /// Snapshot of a single item, `None` if it does not exist.
    pub async fn item(&self, item: &ItemId) -> Result<Option<VotableItem>, VoteError> {
        let path = paths::item_path(&self.config.items_root, item)?;
        match self.store.read(&path).await? {
            Some(doc) => Ok(Some(VotableItem::from_document(item.clone(), &path, &doc)?)),
            None => Ok(None),
        }
    }

    /// Every item under the items root. Malformed items are skipped.
    pub async fn list_items(&self) -> Result<Vec<VotableItem>, VoteError> {
        let root = &self.config.items_root;
        let Some(raw) = self.store.read(root).await? else {
            return Ok(Vec::new());
        };
        let Some(entries) = raw.as_object() else {
            tracing::warn!(path = %root, "Items root is not an object");
            return Ok(Vec::new());
        };
        let mut items = Vec::with_capacity(entries.len());
        for (id, doc) in entries {
            let path = format!("{root}/{id}");
            match VotableItem::from_document(ItemId::new(id.clone()), &path, doc) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(path = %path, error = %e, "Skipping malformed item"),
            }
        }
        Ok(items)
    }

    /// Live `item -> ballot` map of everything `user` has voted on.
    pub fn subscribe_user_votes(&self, user: &UserId) -> Result<UserVotesSubscription, VoteError> {
        if user.is_anonymous() {
            return Err(VoteError::Unauthenticated);
        }
        let path = paths::user_votes_path(&self.config.user_votes_root, user)?;
        Ok(UserVotesSubscription::new(self.store.subscribe(&path)?))
    }

    /// Live snapshot of one item and its counters.
    pub fn subscribe_item(&self, item: &ItemId) -> Result<ItemSubscription, VoteError> {
        let path = paths::item_path(&self.config.items_root, item)?;
        Ok(ItemSubscription::new(item.clone(), self.store.subscribe(&path)?))
    }

    /// Write the vote record, then re-read the item and rewrite the record
    /// until both agree. A later click that commits in between is caught by
    /// the re-read, so the record ends up matching the last committed vote.
    async fn sync_record(
        &self,
        user: &UserId,
        item_path: &str,
        vote_path: &str,
        mut ballot: Option<Ballot>,
    ) -> Result<(), StoreError> {
        for round in 1..=MAX_RECORD_SYNC_ROUNDS {
            match ballot {
                Some(ballot) => self.store.write(vote_path, json!({ "ballot": ballot })).await?,
                None => self.store.remove(vote_path).await?,
            }
            let Some(doc) = self.store.read(item_path).await? else {
                return Ok(());
            };
            let latest = held_ballot(&doc, user).flatten();
            if latest == ballot {
                return Ok(());
            }
            tracing::debug!(path = %vote_path, round, "Vote record overtaken, rewriting");
            ballot = latest;
        }
        tracing::warn!(path = %vote_path, "Vote record still behind the item, leaving it to the next vote");
        Ok(())
    }

    async fn read_ballot(&self, vote_path: &str) -> Result<Option<Ballot>, VoteError> {
        let Some(doc) = self.store.read(vote_path).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<UserVote>(doc) {
            Ok(vote) => Ok(Some(vote.ballot)),
            Err(e) => {
                // A corrupt record is treated as "no vote" so the next write replaces it.
                tracing::warn!(path = %vote_path, error = %e, "Ignoring malformed vote record");
                Ok(None)
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_inner<T>(m: Mutex<T>) -> T {
    m.into_inner().unwrap_or_else(PoisonError::into_inner)
}
