//! Topic grammar: the bridge's base topic, validated response topics, and
//! MQTT-style wildcard matching.
//!
//! The base topic is the subscription root. Its wildcard-stripped prefix is
//! also the one place the bridge must never publish to: every message under
//! it is delivered back to the bridge, so a reply there would be re-executed
//! forever.

use std::fmt;

use tracing::{error, warn};

/// Topic level separator.
pub const SEPARATOR: char = '/';
/// Matches any number of trailing levels.
pub const MULTI_LEVEL_WILDCARD: &str = "#";
/// Matches exactly one level.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Base or response topic that violates its construction invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("base topic must contain at least one non-wildcard level")]
    EmptyBaseTopic,
    #[error("base topic {topic:?} contains an empty level")]
    EmptyLevel { topic: String },
    #[error("base topic {topic:?} contains a single-level wildcard")]
    SingleLevelWildcard { topic: String },
    #[error("base topic {topic:?} has a multi-level wildcard that is not the final level")]
    MisplacedWildcard { topic: String },
    #[error("response topic is blank")]
    BlankResponseTopic,
    #[error("response topic {topic:?} starts with the base prefix {prefix:?}")]
    LoopingResponseTopic { topic: String, prefix: String },
}

// ---------------------------------------------------------------------------
// BaseTopic
// ---------------------------------------------------------------------------

/// Normalized subscription root, always ending in exactly one `/#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseTopic {
    /// Levels before the trailing wildcard, joined by `/`.
    prefix: String,
}

impl BaseTopic {
    /// Validates and normalizes a base topic.
    ///
    /// `a/b` and `a/b/#` both normalize to `a/b/#`. Single-level wildcards,
    /// empty levels, and a `#` anywhere but the final level are rejected.
    ///
    /// # Errors
    ///
    /// Returns the `ValidationError` describing the first violated invariant.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let levels: Vec<&str> = raw.split(SEPARATOR).collect();
        let last = levels.len() - 1;

        for (i, level) in levels.iter().enumerate() {
            if level.contains(SINGLE_LEVEL_WILDCARD) {
                return Err(ValidationError::SingleLevelWildcard {
                    topic: raw.to_string(),
                });
            }
            let trailing_hash = i == last && *level == MULTI_LEVEL_WILDCARD;
            if level.contains(MULTI_LEVEL_WILDCARD) && !trailing_hash {
                return Err(ValidationError::MisplacedWildcard {
                    topic: raw.to_string(),
                });
            }
        }

        let stripped = if levels[last] == MULTI_LEVEL_WILDCARD {
            &levels[..last]
        } else {
            &levels[..]
        };
        if stripped.is_empty() || stripped == [""] {
            return Err(ValidationError::EmptyBaseTopic);
        }
        if stripped.iter().any(|level| level.is_empty()) {
            return Err(ValidationError::EmptyLevel {
                topic: raw.to_string(),
            });
        }

        Ok(Self {
            prefix: stripped.join("/"),
        })
    }

    /// Wildcard-stripped prefix, e.g. `mongodb` for `mongodb/#`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subscription pattern, e.g. `mongodb/#`.
    #[must_use]
    pub fn subscription(&self) -> String {
        format!("{}{SEPARATOR}{MULTI_LEVEL_WILDCARD}", self.prefix)
    }

    /// Returns the part of `topic` below the base prefix, or `None` when the
    /// topic is not under this base.
    #[must_use]
    pub fn strip<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some(rest)
        } else {
            rest.strip_prefix(SEPARATOR)
        }
    }
}

impl fmt::Display for BaseTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{MULTI_LEVEL_WILDCARD}", self.prefix)
    }
}

// ---------------------------------------------------------------------------
// ResponseTopic
// ---------------------------------------------------------------------------

/// A reply destination that is safe to publish to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseTopic(String);

impl ResponseTopic {
    /// Validates a caller-supplied reply topic against the base prefix.
    ///
    /// # Errors
    ///
    /// - `ValidationError::BlankResponseTopic` for empty or whitespace-only input
    /// - `ValidationError::LoopingResponseTopic` when it starts with `base.prefix()`
    pub fn new(candidate: &str, base: &BaseTopic) -> Result<Self, ValidationError> {
        if candidate.trim().is_empty() {
            return Err(ValidationError::BlankResponseTopic);
        }
        if candidate.starts_with(base.prefix()) {
            return Err(ValidationError::LoopingResponseTopic {
                topic: candidate.to_string(),
                prefix: base.prefix().to_string(),
            });
        }
        Ok(Self(candidate.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResponseTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResponseTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keeps the candidates that are valid reply destinations, in order.
///
/// Absent and empty input both yield an empty list. Each invalid entry is
/// logged and dropped on its own; blank entries at `warn`, entries under the
/// base prefix at `error`.
#[must_use]
pub fn filter_response_topics(
    candidates: Option<&[String]>,
    base: &BaseTopic,
) -> Vec<ResponseTopic> {
    let Some(candidates) = candidates else {
        return Vec::new();
    };

    candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| match ResponseTopic::new(candidate, base) {
            Ok(topic) => Some(topic),
            Err(ValidationError::BlankResponseTopic) => {
                warn!(index, "removed blank response topic");
                None
            }
            Err(e) => {
                error!(
                    index,
                    topic = %candidate,
                    error = %e,
                    "removed response topic that would loop back into the bridge"
                );
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Wildcard matching
// ---------------------------------------------------------------------------

/// MQTT topic-filter matching: `+` matches one level, a trailing `#` matches
/// the parent level and everything below it.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split(SEPARATOR);
    let mut topic_levels = topic.split(SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn base() -> BaseTopic {
        BaseTopic::parse("mongodb/#").unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn base_topic_normalizes() {
        assert_eq!(BaseTopic::parse("a/b").unwrap().to_string(), "a/b/#");
        assert_eq!(BaseTopic::parse("a/b/#").unwrap().to_string(), "a/b/#");
        assert_eq!(BaseTopic::parse("a/b/#").unwrap().prefix(), "a/b");
        assert_eq!(BaseTopic::parse("mongodb").unwrap().subscription(), "mongodb/#");
    }

    #[test]
    fn base_topic_rejects_wildcards_in_the_middle() {
        assert!(matches!(
            BaseTopic::parse("a/+/b"),
            Err(ValidationError::SingleLevelWildcard { .. })
        ));
        assert!(matches!(
            BaseTopic::parse("a/#/b"),
            Err(ValidationError::MisplacedWildcard { .. })
        ));
        assert!(matches!(
            BaseTopic::parse("a/b#"),
            Err(ValidationError::MisplacedWildcard { .. })
        ));
        assert!(matches!(
            BaseTopic::parse("a/#/#"),
            Err(ValidationError::MisplacedWildcard { .. })
        ));
    }

    #[test]
    fn base_topic_rejects_empty_roots() {
        assert_eq!(BaseTopic::parse("#"), Err(ValidationError::EmptyBaseTopic));
        assert_eq!(BaseTopic::parse(""), Err(ValidationError::EmptyBaseTopic));
        assert!(matches!(
            BaseTopic::parse("a//b"),
            Err(ValidationError::EmptyLevel { .. })
        ));
    }

    #[test]
    fn strip_requires_a_level_boundary() {
        let base = base();
        assert_eq!(base.strip("mongodb/db/find"), Some("db/find"));
        assert_eq!(base.strip("mongodb"), Some(""));
        assert_eq!(base.strip("mongodbx/db/find"), None);
        assert_eq!(base.strip("other/db/find"), None);
    }

    #[test]
    fn filter_drops_blank_entries() {
        let out = filter_response_topics(Some(&strings(&["", "app/ack"])), &base());
        assert_eq!(out, vec![ResponseTopic("app/ack".to_string())]);
    }

    #[test]
    fn filter_drops_topics_under_the_base_prefix() {
        let out = filter_response_topics(Some(&strings(&["mongodb/anything", "app/ack"])), &base());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_str(), "app/ack");
    }

    #[test]
    fn filter_preserves_order() {
        let candidates = strings(&["z/1", "  ", "a/2", "mongodb", "m/3"]);
        let out = filter_response_topics(Some(&candidates), &base());
        let names: Vec<&str> = out.iter().map(ResponseTopic::as_str).collect();
        assert_eq!(names, vec!["z/1", "a/2", "m/3"]);
    }

    #[test]
    fn absent_and_empty_inputs_yield_nothing() {
        assert!(filter_response_topics(None, &base()).is_empty());
        assert!(filter_response_topics(Some(&[]), &base()).is_empty());
    }

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("mongodb/#", "mongodb/db/find"));
        assert!(topic_matches("mongodb/#", "mongodb"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(topic_matches("app/ack", "app/ack"));
        assert!(!topic_matches("app/ack", "app/ack/more"));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(
            levels in prop::collection::vec("[a-z0-9_]{1,8}", 1..5),
            wildcard in any::<bool>(),
        ) {
            let mut raw = levels.join("/");
            if wildcard {
                raw.push_str("/#");
            }
            let once = BaseTopic::parse(&raw).unwrap();
            let twice = BaseTopic::parse(&once.to_string()).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.to_string().ends_with("/#"));
            prop_assert_eq!(once.to_string().matches('#').count(), 1);
        }

        #[test]
        fn filter_is_idempotent_and_never_loops(
            candidates in prop::collection::vec("(mongodb)?[a-z/ ]{0,12}", 0..8),
        ) {
            let base = base();
            let first = filter_response_topics(Some(&candidates), &base);
            for topic in &first {
                prop_assert!(!topic.as_str().starts_with(base.prefix()));
            }
            let again: Vec<String> = first.iter().map(ToString::to_string).collect();
            let second = filter_response_topics(Some(&again), &base);
            prop_assert_eq!(first, second);
        }
    }
}
