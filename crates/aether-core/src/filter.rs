//! Tag normalization and filter/subscription matching.

use crate::types::{Event, Filter, Subscription, Tag};

/// Accepts the permissive tag shapes a client may send and produces a
/// normalized [`Tag`]. Rejects empty keys.
///
/// Recognized shapes:
/// - an already-normalized `(key, values)` pair
/// - a positional sequence where the first element is the key and the
///   rest are values, each coerced to a string
pub fn normalize_tag(key: impl Into<String>, values: Vec<String>) -> Option<Tag> {
    let key = key.into();
    if key.is_empty() {
        return None;
    }
    Some(Tag { key, values })
}

/// Expand an event's tags into the flat set of `(key, value)` pairs a
/// filter's `tags` clause is matched against.
fn expanded_tag_pairs(event: &Event) -> Vec<(&str, &str)> {
    event
        .tags
        .iter()
        .flat_map(|tag| tag.values.iter().map(move |v| (tag.key.as_str(), v.as_str())))
        .collect()
}

fn matches_pubkey_prefix(event: &Event, prefixes: &[Vec<u8>]) -> bool {
    prefixes.iter().any(|prefix| event.pubkey.starts_with(prefix))
}

/// Does `event` satisfy every clause present in `filter`? Absent clauses
/// impose no constraint.
pub fn match_event(event: &Event, filter: &Filter) -> bool {
    if let Some(kinds) = &filter.kinds {
        if !kinds.contains(&event.kind) {
            return false;
        }
    }
    if let Some(prefixes) = &filter.pubkey_prefixes {
        if !matches_pubkey_prefix(event, prefixes) {
            return false;
        }
    }
    if let Some(required) = &filter.tags {
        let present = expanded_tag_pairs(event);
        let satisfied = required
            .iter()
            .all(|(key, value)| present.iter().any(|(k, v)| *k == key && *v == value));
        if !satisfied {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if event.created_at < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if event.created_at > until {
            return false;
        }
    }
    true
}

/// Does `event` match any filter in `subscription` (filters are OR-ed)?
pub fn matches_subscription(event: &Event, subscription: &Subscription) -> bool {
    subscription
        .filters
        .iter()
        .any(|filter| match_event(event, filter))
}
