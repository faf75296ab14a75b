//! Protocol error types

use thiserror::Error;

use crate::control::MessageKind;

/// Errors from encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize a message to JSON.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Failed to parse a frame body as an envelope.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Failed to parse an envelope payload as its inner message.
    #[error("failed to decode {kind} payload: {source}")]
    Open {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },

    /// Frame exceeds the protocol size guard.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}
