use crate::utils::error::PatternError;

/// Separator between topic levels.
pub const LEVEL_SEPARATOR: char = '/';

/// Matches exactly one non-empty level.
pub const SINGLE_LEVEL: &str = "+";

/// Matches the remainder of a topic, zero or more levels. Final segment only.
pub const MULTI_LEVEL: &str = "#";

const SHARE_PREFIX: &str = "$share/";

/// Returns `true` when `topic` is routed to a subscription on `pattern`.
///
/// Walks both strings level by level. A `$share/{group}/` prefix on the
/// pattern is ignored, since group membership only affects which consumer
/// the broker picks, not whether the filter matches.
///
/// ```
/// use meterbus::routing::topic::matches;
///
/// assert!(matches("meters/readings/#", "meters/readings/user-1"));
/// assert!(!matches("meters/readings/+", "meters/readings/user-1/extra"));
/// ```
pub fn matches(pattern: &str, topic: &str) -> bool {
    let filter = topic_filter(pattern);
    if filter.is_empty() || topic.is_empty() {
        return filter.is_empty() && topic.is_empty();
    }

    let mut levels = topic.split(LEVEL_SEPARATOR);
    for segment in filter.split(LEVEL_SEPARATOR) {
        match segment {
            MULTI_LEVEL => return true,
            SINGLE_LEVEL => match levels.next() {
                Some(level) if !level.is_empty() => {}
                _ => return false,
            },
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }

    levels.next().is_none()
}

/// Rejects patterns that no broker would accept.
pub fn validate_pattern(pattern: &str) -> Result<(), PatternError> {
    let filter = match pattern.strip_prefix(SHARE_PREFIX) {
        Some(rest) => match rest.split_once(LEVEL_SEPARATOR) {
            Some((group, filter)) if !group.is_empty() && !filter.is_empty() => filter,
            _ => return Err(PatternError::MalformedShare(pattern.to_string())),
        },
        None => pattern,
    };

    if filter.is_empty() {
        return Err(PatternError::Empty);
    }

    let segments: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
    let last = segments.len() - 1;
    for (index, segment) in segments.iter().enumerate() {
        if *segment == MULTI_LEVEL {
            if index != last {
                return Err(PatternError::MisplacedMultiLevel(pattern.to_string()));
            }
        } else if *segment != SINGLE_LEVEL
            && (segment.contains(MULTI_LEVEL) || segment.contains(SINGLE_LEVEL))
        {
            return Err(PatternError::PartialWildcard(pattern.to_string()));
        }
    }

    Ok(())
}

/// Strips a `$share/{group}/` prefix, leaving the filter the broker matches.
pub fn topic_filter(pattern: &str) -> &str {
    pattern
        .strip_prefix(SHARE_PREFIX)
        .and_then(|rest| rest.split_once(LEVEL_SEPARATOR))
        .map_or(pattern, |(_, filter)| filter)
}

/// The group name of a shared subscription, if `pattern` is one.
pub fn share_group(pattern: &str) -> Option<&str> {
    pattern
        .strip_prefix(SHARE_PREFIX)
        .and_then(|rest| rest.split_once(LEVEL_SEPARATOR))
        .map(|(group, _)| group)
}

/// Builds `$share/{group}/{filter}`.
pub fn shared_pattern(group: &str, filter: &str) -> String {
    format!("{SHARE_PREFIX}{group}/{filter}")
}
