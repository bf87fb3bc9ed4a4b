//! Store path layout.
//!
//! Items:       <items_root>/<item_id>
//! User votes:  <user_votes_root>/<user_id>/<item_id>

use crate::{ItemId, ProtocolError, UserId, FORBIDDEN_KEY_CHARS};

/// Validate a single path segment.
pub fn validate_key(key: &str) -> Result<(), ProtocolError> {
    if key.is_empty() || key.contains(FORBIDDEN_KEY_CHARS) {
        return Err(ProtocolError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub fn item_path(items_root: &str, item: &ItemId) -> Result<String, ProtocolError> {
    validate_key(item.as_str())?;
    Ok(format!("{items_root}/{item}"))
}

/// Root of all vote records cast by `user`.
pub fn user_votes_path(user_votes_root: &str, user: &UserId) -> Result<String, ProtocolError> {
    validate_key(user.as_str())?;
    Ok(format!("{user_votes_root}/{user}"))
}

pub fn user_vote_path(
    user_votes_root: &str,
    user: &UserId,
    item: &ItemId,
) -> Result<String, ProtocolError> {
    validate_key(item.as_str())?;
    Ok(format!("{}/{item}", user_votes_path(user_votes_root, user)?))
}
