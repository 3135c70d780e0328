//! Live connections indexed by broker id

use crate::transport::BrokerConnection;
use std::collections::BTreeMap;

/// Iteration is in broker id order
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, Box<dyn BrokerConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the connection it replaced, if any
    pub fn insert(
        &mut self,
        connection: Box<dyn BrokerConnection>,
    ) -> Option<Box<dyn BrokerConnection>> {
        self.connections
            .insert(connection.broker_id().to_string(), connection)
    }

    pub fn remove(&mut self, broker_id: &str) -> Option<Box<dyn BrokerConnection>> {
        self.connections.remove(broker_id)
    }

    pub fn get(&self, broker_id: &str) -> Option<&dyn BrokerConnection> {
        self.connections.get(broker_id).map(|c| &**c)
    }

    pub fn get_mut(&mut self, broker_id: &str) -> Option<&mut Box<dyn BrokerConnection>> {
        self.connections.get_mut(broker_id)
    }

    pub fn contains(&self, broker_id: &str) -> bool {
        self.connections.contains_key(broker_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn BrokerConnection)> {
        self.connections
            .iter()
            .map(|(id, connection)| (id.as_str(), &**connection))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Box<dyn BrokerConnection>)> {
        self.connections.iter_mut()
    }

    /// Take every connection out, in id order
    pub fn drain(&mut self) -> Vec<Box<dyn BrokerConnection>> {
        std::mem::take(&mut self.connections).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;

    #[test]
    fn test_insert_get_remove() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.insert(Box::new(MockConnection::new("b"))).is_none());
        assert!(registry.insert(Box::new(MockConnection::new("a"))).is_none());
        assert!(registry.insert(Box::new(MockConnection::new("a"))).is_some());

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert_eq!(registry.get("b").map(|c| c.broker_id()), Some("b"));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_deterministic_order() {
        let mut registry = ConnectionRegistry::new();
        for id in ["gamma", "alpha", "beta"] {
            registry.insert(Box::new(MockConnection::new(id)));
        }
        let ids: Vec<&str> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["alpha", "beta", "gamma"]);

        let drained: Vec<String> = registry
            .drain()
            .iter()
            .map(|c| c.broker_id().to_string())
            .collect();
        assert_eq!(drained, vec!["alpha", "beta", "gamma"]);
        assert!(registry.is_empty());
    }
}
