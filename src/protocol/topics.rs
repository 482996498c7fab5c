//! MQTT topic filter validation and matching
//!
//! Subscription filters may use the `+` (single level) and `#` (multi level)
//! wildcards; publish topics may not use either.

use thiserror::Error;

/// Topic the periodic publisher sends synthetic events to
pub const TEST_EVENT_TOPIC: &str = "edgex/events/test";

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Multi-level wildcard '#' must be the last level of '{0}'")]
    MisplacedMultiLevelWildcard(String),
    #[error("Wildcard must occupy a whole level in '{0}'")]
    PartialLevelWildcard(String),
    #[error("Publish topic '{0}' must not contain wildcards")]
    WildcardInPublishTopic(String),
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err(TopicError::PartialLevelWildcard(filter.to_string()));
            }
            if index != levels.len() - 1 {
                return Err(TopicError::MisplacedMultiLevelWildcard(filter.to_string()));
            }
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::PartialLevelWildcard(filter.to_string()));
        }
    }

    Ok(())
}

/// Validate a concrete topic used for publishing
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(TopicError::WildcardInPublishTopic(topic.to_string()));
    }
    Ok(())
}

/// Whether `topic` is matched by the subscription `filter`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    // Wildcards at the first level never match `$`-prefixed system topics
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
