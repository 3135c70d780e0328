//! Device topic layout and MQTT wildcard matching
//!
//! Devices publish under `devices/{device_id}/...`. Subscriptions use `+` for exactly one
//! level and `#` for the remainder of a topic.

use thiserror::Error;

/// Topics every broker connection subscribes to
pub const SUBSCRIPTION_TOPICS: [&str; 5] = [
    "devices/+/discovery/response",
    "devices/+/data",
    "devices/+/status",
    "devices/+/gps",
    "devices/discover/all",
];

/// Broadcast discovery topic
pub const GLOBAL_DISCOVERY_TOPIC: &str = "devices/discover/all";

/// Topic construction for device traffic
pub struct TopicBuilder;

impl TopicBuilder {
    /// `devices/{id}/data`
    pub fn data(device_id: &str) -> String {
        format!("devices/{device_id}/data")
    }

    /// `devices/{id}/status`
    pub fn status(device_id: &str) -> String {
        format!("devices/{device_id}/status")
    }

    /// `devices/{id}/gps`
    pub fn gps(device_id: &str) -> String {
        format!("devices/{device_id}/gps")
    }

    /// `devices/{id}/discovery/response`
    pub fn discovery_response(device_id: &str) -> String {
        format!("devices/{device_id}/discovery/response")
    }

    /// `devices/{id}/discover`
    pub fn targeted_discovery(device_id: &str) -> String {
        format!("devices/{device_id}/discover")
    }

    /// `devices/{id}/command`
    pub fn command(device_id: &str) -> String {
        format!("devices/{device_id}/command")
    }

    pub fn global_discovery() -> String {
        GLOBAL_DISCOVERY_TOPIC.to_string()
    }
}

/// A subscription filter with `+` and `#` wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    levels: Vec<String>,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self, TopicError> {
        let raw = pattern.into();
        if raw.is_empty() {
            return Err(TopicError::EmptyTopic);
        }

        let levels: Vec<String> = raw.split('/').map(str::to_string).collect();
        for (index, level) in levels.iter().enumerate() {
            if level == "#" && index != levels.len() - 1 {
                return Err(TopicError::MisplacedMultiLevelWildcard(raw.clone()));
            }
            if level.len() > 1 && (level.contains('+') || level.contains('#')) {
                return Err(TopicError::PartialWildcard(raw.clone()));
            }
        }

        Ok(Self { raw, levels })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn has_wildcards(&self) -> bool {
        self.levels.iter().any(|l| l == "+" || l == "#")
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.captures(topic).is_some()
    }

    /// Match `topic` and return the levels consumed by `+` wildcards, in order
    pub fn captures<'t>(&self, topic: &'t str) -> Option<Vec<&'t str>> {
        let mut captured = Vec::new();
        let mut parts = topic.split('/');

        for level in &self.levels {
            match level.as_str() {
                "#" => return Some(captured),
                "+" => captured.push(parts.next()?),
                literal => {
                    if parts.next()? != literal {
                        return None;
                    }
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(captured)
    }

    /// Whether some concrete topic matches both filters
    pub fn overlaps(&self, other: &TopicPattern) -> bool {
        let mut ours = self.levels.iter();
        let mut theirs = other.levels.iter();
        loop {
            match (ours.next().map(String::as_str), theirs.next().map(String::as_str)) {
                (None, None) => return true,
                (Some("#"), _) | (_, Some("#")) => return true,
                (Some(_), None) | (None, Some(_)) => return false,
                (Some("+"), Some(_)) | (Some(_), Some("+")) => {}
                (Some(a), Some(b)) if a == b => {}
                _ => return false,
            }
        }
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Device ids become topic levels, so wildcards and separators are rejected
pub fn validate_device_id(device_id: &str) -> Result<(), TopicError> {
    if device_id.is_empty() {
        return Err(TopicError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(TopicError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

/// The `{id}` level of a `devices/{id}/...` topic
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    if parts.next()? != "devices" {
        return None;
    }
    parts.next().filter(|id| !id.is_empty())
}

#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("'#' must be the last level: {0}")]
    MisplacedMultiLevelWildcard(String),
    #[error("Wildcards must occupy a whole level: {0}")]
    PartialWildcard(String),
    #[error("Topic overlaps a standard device route: {0}")]
    OverlapsStandardRoute(String),
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_level_wildcard() {
        let pattern = TopicPattern::new("devices/+/data").unwrap();
        assert_eq!(pattern.captures("devices/D1/data"), Some(vec!["D1"]));
        assert!(!pattern.matches("devices/D1/status"));
        assert!(!pattern.matches("devices/D1/data/extra"));
        assert!(!pattern.matches("devices/data"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let pattern = TopicPattern::new("farm/+/#").unwrap();
        assert_eq!(pattern.captures("farm/north/a/b/c"), Some(vec!["north"]));
        assert!(pattern.matches("farm/north"));
        assert!(!pattern.matches("barn/north/a"));
    }

    #[test]
    fn test_literal_pattern() {
        let pattern = TopicPattern::new("devices/discover/all").unwrap();
        assert!(!pattern.has_wildcards());
        assert!(pattern.matches("devices/discover/all"));
        // "discover" is not an id: the literal pattern wins only on exact text
        assert!(!pattern.matches("devices/discover/all/x"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(TopicPattern::new(""), Err(TopicError::EmptyTopic));
        assert!(matches!(
            TopicPattern::new("a/#/b"),
            Err(TopicError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            TopicPattern::new("a/b+/c"),
            Err(TopicError::PartialWildcard(_))
        ));
    }

    #[test]
    fn test_overlapping_filters() {
        let data = TopicPattern::new("devices/+/data").unwrap();
        let overlapping = ["devices/#", "#", "+/+/data", "devices/D1/data", "devices/+/#"];
        for topic in overlapping {
            let pattern = TopicPattern::new(topic).unwrap();
            assert!(pattern.overlaps(&data), "{topic}");
            assert!(data.overlaps(&pattern), "{topic}");
        }

        let disjoint = ["farm/#", "devices/+/telemetry", "devices/+", "devices/+/data/x"];
        for topic in disjoint {
            let pattern = TopicPattern::new(topic).unwrap();
            assert!(!pattern.overlaps(&data), "{topic}");
            assert!(!data.overlaps(&pattern), "{topic}");
        }
    }

    #[test]
    fn test_topic_builder() {
        assert_eq!(TopicBuilder::data("D1"), "devices/D1/data");
        assert_eq!(
            TopicBuilder::discovery_response("D1"),
            "devices/D1/discovery/response"
        );
        assert_eq!(TopicBuilder::targeted_discovery("D1"), "devices/D1/discover");
        assert_eq!(TopicBuilder::command("D1"), "devices/D1/command");
        assert_eq!(TopicBuilder::global_discovery(), "devices/discover/all");
    }

    #[test]
    fn test_subscription_topics_are_valid_patterns() {
        for topic in SUBSCRIPTION_TOPICS {
            assert!(TopicPattern::new(topic).is_ok(), "{topic}");
        }
    }

    #[test]
    fn test_validate_device_id() {
        assert!(validate_device_id("esp32-01").is_ok());
        assert_eq!(validate_device_id(""), Err(TopicError::EmptyDeviceId));
        assert_eq!(
            validate_device_id("a/b"),
            Err(TopicError::InvalidDeviceIdChar('/'))
        );
        assert_eq!(
            validate_device_id("a+"),
            Err(TopicError::InvalidDeviceIdChar('+'))
        );
    }

    #[test]
    fn test_device_id_from_topic() {
        assert_eq!(device_id_from_topic("devices/D1/data"), Some("D1"));
        assert_eq!(device_id_from_topic("devices//data"), None);
        assert_eq!(device_id_from_topic("sensors/D1/data"), None);
    }

    proptest! {
        #[test]
        fn prop_hash_matches_any_suffix(suffix in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}") {
            let pattern = TopicPattern::new("devices/#").unwrap();
            let topic = format!("devices/{suffix}");
            prop_assert!(pattern.matches(&topic));
        }

        #[test]
        fn prop_overlap_agrees_with_a_shared_topic(id in "[A-Za-z0-9_-]{1,16}") {
            let topic = TopicBuilder::status(&id);
            let standard = TopicPattern::new("devices/+/status").unwrap();
            let exact = TopicPattern::new(topic.clone()).unwrap();
            prop_assert!(standard.matches(&topic) && exact.matches(&topic));
            prop_assert!(standard.overlaps(&exact));
        }

        #[test]
        fn prop_plus_captures_the_id(id in "[A-Za-z0-9_-]{1,16}") {
            let pattern = TopicPattern::new("devices/+/status").unwrap();
            let topic = TopicBuilder::status(&id);
            prop_assert_eq!(pattern.captures(&topic), Some(vec![id.as_str()]));
        }
    }
}
