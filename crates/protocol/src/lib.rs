//! Courier Protocol
//!
//! The event model and controller wire protocol shared by every Courier
//! crate. This crate is pure data: serde types, action vocabularies and the
//! length-prefixed frame codec. It performs no I/O.
//!
//! # Wire format
//!
//! Every frame on the controller link is a 4-byte big-endian length followed
//! by a JSON-encoded [`Envelope`]. The envelope payload is itself the JSON
//! encoding of one of the inner control messages ([`AgentMessage`],
//! [`SourceMessage`], [`SinkMessage`]), carried as base64 bytes.

mod control;
mod error;
mod events;
mod frame;

pub use control::{
    ActionDescriptor, AgentAction, AgentMessage, AgentStatus, ColumnSchema, Envelope, MessageKind,
    SchemaMap, SinkAction, SinkMessage, SinkStatus, SourceAction, SourceMessage, SourceStatus,
    TableSchema,
};
pub use error::ProtocolError;
pub use events::{Event, GenericEvent, SqlEvent, SqlOperation, TransportMessage};
pub use frame::{decode_frame, encode_frame, frame_len, MAX_FRAME_BYTES};

/// Serde adapter encoding `Vec<u8>` fields as base64 strings.
///
/// JSON has no native byte type; base64 keeps payloads compact and matches
/// what the controller emits.
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
