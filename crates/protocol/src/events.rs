//! Event model
//!
//! The tagged union carried through the data plane, from source output to
//! sink delivery. The pipeline only ever looks at the environment, database
//! and primary-key fields; everything else is opaque payload.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event flowing from a source to the subscribed sinks.
///
/// Sinks serialize the inner variant (not the tagged union) onto their
/// transport; the tag exists for in-process routing and debug output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A row-level change captured from a database.
    Sql(SqlEvent),

    /// An opaque keyed payload from a non-relational source.
    Generic(GenericEvent),

    /// An already-serialized record passed through untouched.
    Transport(TransportMessage),
}

impl Event {
    /// The environment tag used for routing and topic derivation.
    ///
    /// `Transport` messages carry no environment; they route on their own
    /// topic instead.
    pub fn environment(&self) -> Option<&str> {
        match self {
            Self::Sql(e) => Some(&e.environment),
            Self::Generic(e) => Some(&e.environment),
            Self::Transport(_) => None,
        }
    }
}

/// Row-level change event produced by database CDC sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlEvent {
    /// Environment tag (e.g. `prod`).
    pub environment: String,

    /// Database the change happened in.
    pub database: String,

    /// Table the change happened in.
    pub table: String,

    /// Primary key of the affected row, pre-rendered as a string.
    pub primary_key: String,

    /// The kind of change.
    pub operation: SqlOperation,

    /// Column name to value, post-image for insert/update, pre-image for delete.
    pub columns: HashMap<String, serde_json::Value>,

    /// Commit timestamp as reported by the source.
    pub timestamp: DateTime<Utc>,
}

/// Change operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlOperation {
    Insert,
    Update,
    Delete,
}

/// Opaque keyed event from a non-relational source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericEvent {
    /// Environment tag.
    pub environment: String,

    /// Partitioning key.
    pub key: String,

    /// Raw payload bytes (base64 on the wire).
    #[serde(with = "crate::b64")]
    pub value: Vec<u8>,

    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Already-serialized record forwarded verbatim to the sink transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Topic the record was read from; prefixed on re-publish.
    pub topic: String,

    /// Record key (base64 on the wire).
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,

    /// Record value (base64 on the wire).
    #[serde(with = "crate::b64")]
    pub value: Vec<u8>,
}

#[cfg(test)]
#[path = "events_test.rs"]
mod events_test;
