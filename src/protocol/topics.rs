//! MQTT topic name and topic filter rules
//!
//! Implements the MQTT 3.1.1 validation rules for topic filters (section 4.7)
//! and the wildcard matching used to decide whether a delivered topic belongs
//! to a subscription.

use thiserror::Error;

/// Maximum encoded length of a topic or topic filter
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Validate a subscription topic filter.
///
/// `+` must occupy a whole level, `#` must occupy the whole last level, and the
/// filter may not be empty or contain NUL.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(filter.len()));
    }
    if filter.contains('\0') {
        return Err(TopicError::NulCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Check whether `topic` is matched by `filter`.
///
/// Topics starting with `$` are never matched by a filter whose first level
/// is a wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic exceeds 65535 bytes: {0} bytes given")]
    TooLong(usize),
    #[error("Topic contains a NUL character")]
    NulCharacter,
    #[error("'#' must be the last level on its own: {0}")]
    MisplacedMultiLevelWildcard(String),
    #[error("'+' must occupy a whole level: {0}")]
    MisplacedSingleLevelWildcard(String),
}
