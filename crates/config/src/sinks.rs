//! Sink configuration entries
//!
//! Sinks are named instances under `[sinks.<name>]`. As with sources, only
//! lifecycle fields are interpreted here; the type-specific options go to
//! the sink factory as raw JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Container for all sink entries
///
/// # Example
///
/// ```toml
/// [sinks.main]
/// type = "kafka"
/// brokers = ["kafka-1:9092", "kafka-2:9092"]
/// topic_prefix = "cdc_"
/// maxmessagebytes = 1000000
/// nbproducer = 1
///
/// [sinks.debug]
/// type = "stdout"
/// enabled = false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SinksConfig {
    /// Named sink instances
    #[serde(flatten)]
    entries: HashMap<String, SinkEntry>,
}

impl SinksConfig {
    /// Get a sink entry by name
    pub fn get(&self, name: &str) -> Option<&SinkEntry> {
        self.entries.get(name)
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SinkEntry)> {
        self.entries.iter()
    }

    /// Get the number of configured sinks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no sinks are configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume into the underlying map
    pub fn into_entries(self) -> HashMap<String, SinkEntry> {
        self.entries
    }
}

impl FromIterator<(String, SinkEntry)> for SinksConfig {
    fn from_iter<I: IntoIterator<Item = (String, SinkEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Configuration for a single sink instance
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SinkEntry {
    /// Sink type name resolved by the factory (e.g. "kafka", "stdout")
    #[serde(rename = "type")]
    pub sink_type: String,

    /// Whether this sink may be started
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Type-specific options, passed to the factory untouched
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl SinkEntry {
    /// The type-specific options as a JSON object value.
    pub fn options_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.options.clone())
    }
}

fn default_true() -> bool {
    true
}
