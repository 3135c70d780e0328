//! Ordered topic → handler table
//!
//! Routes are tried in order and the first match wins. Device-declared custom topics
//! sit in front of the standard `devices/...` routes but may never overlap them, so a
//! device cannot take traffic meant for another device's handlers.

use crate::protocol::topics::{TopicError, TopicPattern, GLOBAL_DISCOVERY_TOPIC};

/// Which handler a topic is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Discovery,
    Data,
    Status,
    Gps,
    GlobalDiscovery,
    Custom,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Discovery => "discovery",
            HandlerKind::Data => "data",
            HandlerKind::Status => "status",
            HandlerKind::Gps => "gps",
            HandlerKind::GlobalDiscovery => "global-discovery",
            HandlerKind::Custom => "custom",
        }
    }

    /// Handler for a `topic_overrides` key
    pub fn for_override_key(key: &str) -> Self {
        match key {
            "data" => HandlerKind::Data,
            "status" => HandlerKind::Status,
            "gps" => HandlerKind::Gps,
            _ => HandlerKind::Custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RouteTarget {
    /// Device id, if any, is the first `+` capture
    Standard(HandlerKind),
    /// Topic owned by one device
    Custom { device_id: String, key: String },
}

#[derive(Debug, Clone)]
struct Route {
    pattern: TopicPattern,
    target: RouteTarget,
}

/// Where a topic goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub handler: HandlerKind,
    pub device_id: Option<String>,
    /// Set for device-declared topics
    pub custom_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchTable {
    routes: Vec<Route>,
    custom_count: usize,
}

impl DispatchTable {
    /// The fixed `devices/...` routes
    pub fn standard() -> Self {
        let standard = [
            (GLOBAL_DISCOVERY_TOPIC, HandlerKind::GlobalDiscovery),
            ("devices/+/discovery/response", HandlerKind::Discovery),
            ("devices/+/data", HandlerKind::Data),
            ("devices/+/status", HandlerKind::Status),
            ("devices/+/gps", HandlerKind::Gps),
        ];

        let routes = standard
            .into_iter()
            .filter_map(|(pattern, kind)| {
                TopicPattern::new(pattern).ok().map(|pattern| Route {
                    pattern,
                    target: RouteTarget::Standard(kind),
                })
            })
            .collect();

        Self {
            routes,
            custom_count: 0,
        }
    }

    /// Register a device-declared topic.
    ///
    /// Replaces any earlier topic the device declared under the same key. Returns
    /// `true` when the topic was not routed before and needs a subscription. A topic
    /// that any standard route could also match is rejected.
    pub fn register_custom(
        &mut self,
        device_id: &str,
        key: &str,
        topic: &str,
    ) -> Result<bool, TopicError> {
        let pattern = TopicPattern::new(topic)?;
        if self.routes[self.custom_count..]
            .iter()
            .any(|route| route.pattern.overlaps(&pattern))
        {
            return Err(TopicError::OverlapsStandardRoute(topic.to_string()));
        }
        let target = RouteTarget::Custom {
            device_id: device_id.to_string(),
            key: key.to_string(),
        };

        if let Some(existing) = self.routes[..self.custom_count]
            .iter()
            .find(|route| route.target == target)
        {
            if existing.pattern == pattern {
                return Ok(false);
            }
        }

        let before = self.routes.len();
        self.routes.retain(|route| route.target != target);
        self.custom_count -= before - self.routes.len();

        let already_routed = self.routes[..self.custom_count]
            .iter()
            .any(|route| route.pattern == pattern);

        self.routes.insert(self.custom_count, Route { pattern, target });
        self.custom_count += 1;
        Ok(!already_routed)
    }

    /// First matching route for a topic
    pub fn resolve(&self, topic: &str) -> Option<Dispatch> {
        self.routes.iter().find_map(|route| {
            let captures = route.pattern.captures(topic)?;
            Some(match &route.target {
                RouteTarget::Standard(kind) => Dispatch {
                    handler: *kind,
                    device_id: captures.first().map(|id| id.to_string()),
                    custom_key: None,
                },
                RouteTarget::Custom { device_id, key } => Dispatch {
                    handler: HandlerKind::for_override_key(key),
                    device_id: Some(device_id.clone()),
                    custom_key: Some(key.clone()),
                },
            })
        })
    }

    /// Device-declared topics, in routing order, without duplicates
    pub fn custom_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for route in &self.routes[..self.custom_count] {
            let topic = route.pattern.as_str();
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        topics
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_routes() {
        let table = DispatchTable::standard();

        let dispatch = table.resolve("devices/D1/data").unwrap();
        assert_eq!(dispatch.handler, HandlerKind::Data);
        assert_eq!(dispatch.device_id.as_deref(), Some("D1"));

        let dispatch = table.resolve("devices/D1/discovery/response").unwrap();
        assert_eq!(dispatch.handler, HandlerKind::Discovery);

        assert_eq!(
            table.resolve("devices/D2/status").unwrap().handler,
            HandlerKind::Status
        );
        assert_eq!(
            table.resolve("devices/D2/gps").unwrap().handler,
            HandlerKind::Gps
        );
    }

    #[test]
    fn test_global_discovery_is_not_a_device() {
        let dispatch = DispatchTable::standard()
            .resolve("devices/discover/all")
            .unwrap();
        assert_eq!(dispatch.handler, HandlerKind::GlobalDiscovery);
        assert_eq!(dispatch.device_id, None);
    }

    #[test]
    fn test_unrouted_topics() {
        let table = DispatchTable::standard();
        assert!(table.resolve("devices/D1/command").is_none());
        assert!(table.resolve("devices/D1/data/extra").is_none());
        assert!(table.resolve("other/D1/data").is_none());
    }

    #[test]
    fn test_custom_data_topic_redispatches() {
        let mut table = DispatchTable::standard();
        assert!(table
            .register_custom("D7", "data", "farm/barn/telemetry")
            .unwrap());

        let dispatch = table.resolve("farm/barn/telemetry").unwrap();
        assert_eq!(dispatch.handler, HandlerKind::Data);
        assert_eq!(dispatch.device_id.as_deref(), Some("D7"));
        assert_eq!(dispatch.custom_key.as_deref(), Some("data"));
    }

    #[test]
    fn test_custom_key_goes_to_hook() {
        let mut table = DispatchTable::standard();
        table
            .register_custom("D7", "irrigation", "farm/valves/+")
            .unwrap();

        let dispatch = table.resolve("farm/valves/3").unwrap();
        assert_eq!(dispatch.handler, HandlerKind::Custom);
        assert_eq!(dispatch.device_id.as_deref(), Some("D7"));
    }

    #[test]
    fn test_custom_topic_cannot_shadow_standard_routes() {
        let mut table = DispatchTable::standard();
        for topic in ["devices/#", "#", "devices/shared/data", "+/+/discovery/response"] {
            assert_eq!(
                table.register_custom("D7", "events", topic),
                Err(TopicError::OverlapsStandardRoute(topic.to_string()))
            );
        }
        assert!(table.custom_topics().is_empty());

        let dispatch = table.resolve("devices/D8/discovery/response").unwrap();
        assert_eq!(dispatch.handler, HandlerKind::Discovery);
        assert_eq!(dispatch.device_id.as_deref(), Some("D8"));
    }

    #[test]
    fn test_custom_topic_beside_standard_routes() {
        let mut table = DispatchTable::standard();
        table
            .register_custom("D7", "status", "devices/D7/heartbeat")
            .unwrap();

        let dispatch = table.resolve("devices/D7/heartbeat").unwrap();
        assert_eq!(dispatch.handler, HandlerKind::Status);
        assert_eq!(dispatch.device_id.as_deref(), Some("D7"));
        assert_eq!(
            table.resolve("devices/D7/status").unwrap().custom_key,
            None
        );
    }

    #[test]
    fn test_reregistering_replaces_topic() {
        let mut table = DispatchTable::standard();
        assert!(table.register_custom("D7", "data", "a/b").unwrap());
        assert!(!table.register_custom("D7", "data", "a/b").unwrap());
        assert!(table.register_custom("D7", "data", "a/c").unwrap());

        assert!(table.resolve("a/b").is_none());
        assert!(table.resolve("a/c").is_some());
        assert_eq!(table.custom_topics(), vec!["a/c".to_string()]);
    }

    #[test]
    fn test_shared_custom_topic_needs_one_subscription() {
        let mut table = DispatchTable::standard();
        assert!(table.register_custom("D1", "alerts", "farm/alerts").unwrap());
        assert!(!table.register_custom("D2", "alerts", "farm/alerts").unwrap());
        assert_eq!(table.custom_topics().len(), 1);
    }

    #[test]
    fn test_invalid_custom_topic_rejected() {
        let mut table = DispatchTable::standard();
        assert!(table.register_custom("D1", "data", "a/#/b").is_err());
        assert!(table.register_custom("D1", "data", "").is_err());
        assert!(table.custom_topics().is_empty());
    }
}
