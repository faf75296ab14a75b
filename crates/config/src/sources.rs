//! Source configuration entries
//!
//! Sources are named instances under `[sources.<name>]`. Only the lifecycle
//! fields are interpreted here; everything else in the table is kept as raw
//! options and parsed by the source factory for its type. The controller can
//! push configuration for source types a given build does not know about, so
//! the entries stay open-ended rather than a closed tagged enum.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Container for all source entries
///
/// # Example
///
/// ```toml
/// [sources.orders]
/// type = "random"
/// autostart = true
/// interval = "500ms"
///
/// [sources.probe]
/// type = "dummy"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SourcesConfig {
    /// Named source instances
    #[serde(flatten)]
    entries: HashMap<String, SourceEntry>,
}

impl SourcesConfig {
    /// Get a source entry by name
    pub fn get(&self, name: &str) -> Option<&SourceEntry> {
        self.entries.get(name)
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SourceEntry)> {
        self.entries.iter()
    }

    /// Get the number of configured sources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no sources are configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume into the underlying map
    pub fn into_entries(self) -> HashMap<String, SourceEntry> {
        self.entries
    }
}

impl FromIterator<(String, SourceEntry)> for SourcesConfig {
    fn from_iter<I: IntoIterator<Item = (String, SourceEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Configuration for a single source instance
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceEntry {
    /// Source type name resolved by the factory (e.g. "dummy", "random")
    #[serde(rename = "type")]
    pub source_type: String,

    /// Whether this source may be started at all
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Start the source as soon as configuration is applied
    /// Default: false (the controller starts it explicitly)
    #[serde(default)]
    pub autostart: bool,

    /// Type-specific options, passed to the factory untouched
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl SourceEntry {
    /// The type-specific options as a JSON object value.
    pub fn options_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.options.clone())
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_entries() {
        let toml = r#"
[orders]
type = "random"
autostart = true
interval = "500ms"

[probe]
type = "dummy"
enabled = false
"#;
        let config: SourcesConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.len(), 2);

        let orders = config.get("orders").unwrap();
        assert_eq!(orders.source_type, "random");
        assert!(orders.enabled);
        assert!(orders.autostart);
        assert_eq!(orders.options["interval"], "500ms");

        let probe = config.get("probe").unwrap();
        assert!(!probe.enabled);
        assert!(!probe.autostart);
        assert!(probe.options.is_empty());
    }

    #[test]
    fn test_deserialize_from_json() {
        // the controller pushes the same schema as JSON
        let json = r#"{"s1": {"type": "dummy", "autostart": true}}"#;
        let config: SourcesConfig = serde_json::from_str(json).unwrap();
        let s1 = config.get("s1").unwrap();
        assert_eq!(s1.source_type, "dummy");
        assert!(s1.autostart);
    }

    #[test]
    fn test_entry_equality_tracks_options() {
        let a: SourcesConfig = toml::from_str("[s]\ntype = \"random\"\ninterval = \"1s\"").unwrap();
        let b: SourcesConfig = toml::from_str("[s]\ntype = \"random\"\ninterval = \"2s\"").unwrap();
        assert_ne!(a.get("s"), b.get("s"));
    }

    #[test]
    fn test_empty_config() {
        let config: SourcesConfig = toml::from_str("").unwrap();
        assert!(config.is_empty());
    }
}
