/// Collection holding votable items (build posts, guides, patch notes).
pub const DEFAULT_ITEMS_ROOT: &str = "posts";

/// Collection holding per-user vote records, indexed by user then item.
pub const DEFAULT_USER_VOTES_ROOT: &str = "userVotes";

/// Retry ceiling for a conditional update before it is reported as failed.
pub const DEFAULT_MAX_TRANSACTION_RETRIES: u32 = 25;

/// Document field names for the denormalized counters.
pub const UPVOTE_COUNT_FIELD: &str = "upvoteCount";
pub const DOWNVOTE_COUNT_FIELD: &str = "downvoteCount";

/// Item field mapping each voter to the ballot they hold on that item.
/// The counters are only ever changed together with this map.
pub const VOTERS_FIELD: &str = "voters";

/// Entry left in the voters map after a ballot is withdrawn.
pub const NO_BALLOT_MARKER: &str = "none";

/// Counter field names written by older clients.
pub const LEGACY_UPVOTES_FIELD: &str = "upvotes";
pub const LEGACY_DOWNVOTES_FIELD: &str = "downvotes";

/// Characters the store does not accept inside a single path segment.
pub const FORBIDDEN_KEY_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];
