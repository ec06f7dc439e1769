use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Response-body descriptor for a status code, used verbatim as error
/// bodies and in log lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDescriptor {
    #[serde(rename = "Description")]
    pub description: String,
}

impl MessageDescriptor {
    #[must_use]
    pub fn new(description: &str) -> Self {
        Self { description: description.to_string() }
    }
}

/// Static status-code → descriptor mapping. Keys are stringified status
/// codes plus the distinguished "400b" payload-error variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCatalog {
    #[serde(flatten)]
    messages: BTreeMap<String, MessageDescriptor>,
}

static FALLBACK_DESCRIPTOR: Lazy<MessageDescriptor> =
    Lazy::new(|| MessageDescriptor::new("Unexpected condition"));

impl MessageCatalog {
    #[must_use]
    pub fn descriptor(&self, key: &str) -> &MessageDescriptor {
        self.messages.get(key).unwrap_or(&FALLBACK_DESCRIPTOR)
    }
}

impl Default for MessageCatalog {
    fn default() -> Self {
        let mut messages = BTreeMap::new();
        messages.insert("200".into(), MessageDescriptor::new("Request successful"));
        messages.insert("201".into(), MessageDescriptor::new("Entity created"));
        messages.insert("204".into(), MessageDescriptor::new("Request successful, no content"));
        messages.insert(
            "400".into(),
            MessageDescriptor::new("Bad request, incorrect or unsupported parameters"),
        );
        messages.insert(
            "400b".into(),
            MessageDescriptor::new("Bad request, malformed or incomplete payload"),
        );
        messages.insert("404".into(), MessageDescriptor::new("No entities matched the request"));
        messages.insert("409".into(), MessageDescriptor::new("Entity matched more than once"));
        messages
            .insert("501".into(), MessageDescriptor::new("Requested feature is not implemented"));
        Self { messages }
    }
}

/// Immutable broker configuration, injected at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Fallback entity type for unrecognized types on create.
    pub default_type: String,
    /// Primary collection queried by all read paths.
    pub entities_collection: String,
    /// Parent collections receiving counter side effects.
    pub locations_collection: String,
    pub zones_collection: String,
    /// Entity type → physical collection routing.
    pub collections: BTreeMap<String, String>,
    /// Acceptable Content-Type / Accept header values.
    pub content_types: Vec<String>,
    pub messages: MessageCatalog,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let mut collections = BTreeMap::new();
        collections.insert("Thing".into(), "Entities".into());
        collections.insert("Device".into(), "Entities".into());
        collections.insert("Application".into(), "Entities".into());
        collections.insert("Location".into(), "Locations".into());
        collections.insert("Zone".into(), "Zones".into());
        Self {
            default_type: "Thing".into(),
            entities_collection: "Entities".into(),
            locations_collection: "Locations".into(),
            zones_collection: "Zones".into(),
            collections,
            content_types: vec!["application/json".into(), "text/plain".into()],
            messages: MessageCatalog::default(),
        }
    }
}

impl BrokerConfig {
    /// Loads configuration from a TOML file, filling gaps with defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// True when the entity type routes to a known physical collection.
    #[must_use]
    pub fn knows_type(&self, entity_type: &str) -> bool {
        self.collections.contains_key(entity_type)
    }

    #[must_use]
    pub fn collection_for_type(&self, entity_type: &str) -> Option<&str> {
        self.collections.get(entity_type).map(String::as_str)
    }
}
