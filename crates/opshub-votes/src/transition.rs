//! Ballot state machine.
//!
//! The ballot a user holds on an item is one of {none, up, down}. Voting the
//! ballot already held withdraws it; voting the other one switches. Every
//! edge moves each counter by at most one.
//!
//! | current | requested | next | up | down |
//! |---------|-----------|------|----|------|
//! | none    | up        | up   | +1 |  0   |
//! | none    | down      | down |  0 | +1   |
//! | up      | up        | none | -1 |  0   |
//! | down    | down      | none |  0 | -1   |
//! | up      | down      | down | -1 | +1   |
//! | down    | up        | up   | +1 | -1   |

use opshub_protocol::constants::*;
use opshub_protocol::{Ballot, ProtocolError, UserId, VoteCounters};
use serde_json::{json, Map, Value};

/// One edge of the ballot state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<Ballot>,
    pub to: Option<Ballot>,
    pub up_delta: i8,
    pub down_delta: i8,
}

/// Edge taken when a user holding `current` clicks `requested`.
pub fn transition(current: Option<Ballot>, requested: Ballot) -> Transition {
    let (to, up_delta, down_delta) = match (current, requested) {
        (None, Ballot::Up) => (Some(Ballot::Up), 1, 0),
        (None, Ballot::Down) => (Some(Ballot::Down), 0, 1),
        (Some(Ballot::Up), Ballot::Up) => (None, -1, 0),
        (Some(Ballot::Down), Ballot::Down) => (None, 0, -1),
        (Some(Ballot::Up), Ballot::Down) => (Some(Ballot::Down), -1, 1),
        (Some(Ballot::Down), Ballot::Up) => (Some(Ballot::Up), 1, -1),
    };
    Transition {
        from: current,
        to,
        up_delta,
        down_delta,
    }
}

impl Transition {
    /// Counters after this edge. Decrements stop at zero.
    pub fn apply_to(&self, counters: VoteCounters) -> VoteCounters {
        VoteCounters {
            upvote_count: shift(counters.upvote_count, self.up_delta),
            downvote_count: shift(counters.downvote_count, self.down_delta),
        }
    }

    pub fn is_withdrawal(&self) -> bool {
        self.from.is_some() && self.to.is_none()
    }
}

fn shift(count: u64, delta: i8) -> u64 {
    if delta >= 0 {
        count.saturating_add(delta as u64)
    } else {
        count.saturating_sub(delta.unsigned_abs() as u64)
    }
}

/// Ballot `voter` holds according to the item document itself.
///
/// Returns `None` when the item has no entry for `voter`, which is the case
/// for items last written before the voters map existed.
pub fn held_ballot(doc: &Value, voter: &UserId) -> Option<Option<Ballot>> {
    let entry = doc.get(VOTERS_FIELD)?.get(voter.as_str())?.as_str()?;
    if entry == NO_BALLOT_MARKER {
        return Some(None);
    }
    entry.parse::<Ballot>().ok().map(Some)
}

/// Apply `step` taken by `voter` to a raw item document.
///
/// The counters and the voter's entry in the voters map change together.
/// Legacy `upvotes`/`downvotes` fields are folded into the current field
/// names. Every other field is kept.
pub fn tally_document(
    path: &str,
    doc: &Value,
    voter: &UserId,
    step: &Transition,
) -> Result<Value, ProtocolError> {
    let counters = step.apply_to(VoteCounters::from_document(path, doc)?);
    let mut obj = doc.as_object().cloned().unwrap_or_default();
    obj.remove(LEGACY_UPVOTES_FIELD);
    obj.remove(LEGACY_DOWNVOTES_FIELD);
    obj.insert(UPVOTE_COUNT_FIELD.into(), json!(counters.upvote_count));
    obj.insert(DOWNVOTE_COUNT_FIELD.into(), json!(counters.downvote_count));

    let voters = obj
        .entry(VOTERS_FIELD)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ProtocolError::MalformedDocument {
            path: path.to_string(),
            reason: "voters is not an object".into(),
        })?;
    let entry = step.to.map_or(NO_BALLOT_MARKER, Ballot::as_str);
    voters.insert(voter.as_str().to_string(), json!(entry));
    Ok(Value::Object(obj))
}
