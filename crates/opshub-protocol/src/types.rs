use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::constants::*;
use crate::ProtocolError;

/// Identity of an authenticated user as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty/whitespace identity an unauthenticated caller carries.
    pub fn is_anonymous(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a votable item, assigned at creation and never changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random key for a newly authored item.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user's active vote on one item. "No vote" is the absence of a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ballot {
    Up,
    Down,
}

impl Ballot {
    pub fn opposite(self) -> Self {
        match self {
            Ballot::Up => Ballot::Down,
            Ballot::Down => Ballot::Up,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Ballot::Up => "up",
            Ballot::Down => "down",
        }
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Ballot {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Ballot::Up),
            "down" => Ok(Ballot::Down),
            other => Err(ProtocolError::MalformedDocument {
                path: String::new(),
                reason: format!("unknown ballot '{other}'"),
            }),
        }
    }
}

/// Per-user vote record stored at `<user_votes_root>/<user>/<item>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserVote {
    pub ballot: Ballot,
}

/// Denormalized counters carried on a votable item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCounters {
    #[serde(default, alias = "upvotes")]
    pub upvote_count: u64,
    #[serde(default, alias = "downvotes")]
    pub downvote_count: u64,
}

impl VoteCounters {
    pub fn new(upvote_count: u64, downvote_count: u64) -> Self {
        Self { upvote_count, downvote_count }
    }

    /// Read counters out of a raw item document.
    ///
    /// Missing counters read as zero, and so do negative ones left behind by
    /// older clients. Anything non-numeric is rejected.
    pub fn from_document(path: &str, doc: &Value) -> Result<Self, ProtocolError> {
        let obj = doc.as_object().ok_or_else(|| ProtocolError::MalformedDocument {
            path: path.to_string(),
            reason: "item is not an object".into(),
        })?;
        Ok(Self {
            upvote_count: read_counter(path, obj, UPVOTE_COUNT_FIELD, LEGACY_UPVOTES_FIELD)?,
            downvote_count: read_counter(path, obj, DOWNVOTE_COUNT_FIELD, LEGACY_DOWNVOTES_FIELD)?,
        })
    }
}

fn read_counter(
    path: &str,
    obj: &Map<String, Value>,
    field: &str,
    legacy: &str,
) -> Result<u64, ProtocolError> {
    let Some(value) = obj.get(field).or_else(|| obj.get(legacy)) else {
        return Ok(0);
    };
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if let Some(v) = n.as_f64() {
                Ok(if v.is_finite() && v > 0.0 { v.floor() as u64 } else { 0 })
            } else {
                Ok(0)
            }
        }
        other => Err(ProtocolError::MalformedDocument {
            path: path.to_string(),
            reason: format!("counter '{field}' is not a number: {other}"),
        }),
    }
}

/// Snapshot of a votable item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VotableItem {
    pub id: ItemId,
    #[serde(flatten)]
    pub counters: VoteCounters,
    /// Every other document field (title, category, createdAt, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl VotableItem {
    pub fn from_document(id: ItemId, path: &str, doc: &Value) -> Result<Self, ProtocolError> {
        let counters = VoteCounters::from_document(path, doc)?;
        let mut fields = doc.as_object().cloned().unwrap_or_default();
        for key in [
            UPVOTE_COUNT_FIELD,
            DOWNVOTE_COUNT_FIELD,
            LEGACY_UPVOTES_FIELD,
            LEGACY_DOWNVOTES_FIELD,
            VOTERS_FIELD,
        ] {
            fields.remove(key);
        }
        Ok(Self { id, counters, fields })
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }

    /// Creation time in epoch milliseconds. Accepts the numeric server
    /// timestamp or an RFC 3339 string.
    pub fn created_at_millis(&self) -> Option<i64> {
        match self.fields.get("createdAt")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
            _ => None,
        }
    }
}
