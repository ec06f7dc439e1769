pub mod config;
pub mod document;
pub mod entities;
pub mod errors;
pub mod logger;
pub mod query;
pub mod store;
pub mod types;

use crate::config::BrokerConfig;
use crate::entities::Entities;
use crate::store::{EntityStore, MemoryStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The context broker façade: wires the entity service to a store and
/// carries the request-validation helpers the hosting HTTP layer calls
/// before dispatching.
pub struct Broker {
    config: BrokerConfig,
    entities: Entities,
}

impl Broker {
    /// Builds a broker over any store implementation.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, config: BrokerConfig) -> Self {
        let entities = Entities::new(store, config.clone());
        log::info!("broker initialization complete");
        Self { config, entities }
    }

    /// Builds a broker over a fresh in-memory store.
    #[must_use]
    pub fn in_memory(config: BrokerConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    #[must_use]
    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Checks the request Accept type against the configured whitelist.
    #[must_use]
    pub fn accepts_type(&self, headers: &BTreeMap<String, String>) -> bool {
        headers
            .get("Accept")
            .is_some_and(|v| self.config.content_types.iter().any(|c| c == v))
    }

    /// Checks the request Content-Type against the configured whitelist.
    #[must_use]
    pub fn content_type_ok(&self, headers: &BTreeMap<String, String>) -> bool {
        headers
            .get("Content-Type")
            .is_some_and(|v| self.config.content_types.iter().any(|c| c == v))
    }

    /// Checks that a request payload is well-formed JSON.
    #[must_use]
    pub fn payload_is_json(&self, payload: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(payload).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn content_type_checks_use_whitelist() {
        let broker = Broker::in_memory(BrokerConfig::default());
        assert!(broker.content_type_ok(&headers(&[("Content-Type", "application/json")])));
        assert!(!broker.content_type_ok(&headers(&[("Content-Type", "text/xml")])));
        assert!(!broker.content_type_ok(&headers(&[])));
        assert!(broker.accepts_type(&headers(&[("Accept", "application/json")])));
    }

    #[test]
    fn payload_json_check() {
        let broker = Broker::in_memory(BrokerConfig::default());
        assert!(broker.payload_is_json("{\"id\": \"e1\"}"));
        assert!(!broker.payload_is_json("{id:"));
    }
}
