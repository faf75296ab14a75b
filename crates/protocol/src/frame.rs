//! Wire framing
//!
//! Frames on the controller link are a 4-byte big-endian length prefix
//! followed by the JSON encoding of an [`Envelope`]. The codec here is
//! synchronous; the link crate drives it over the socket.

use crate::control::Envelope;
use crate::error::ProtocolError;

/// Upper bound on a single frame body, prefix excluded.
///
/// Anything larger is treated as a protocol violation rather than a large
/// message: control traffic is small, and the guard keeps a corrupt length
/// prefix from triggering a giant allocation.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Encode an envelope into a length-prefixed frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(envelope).map_err(ProtocolError::Encode)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body (the bytes after the length prefix).
pub fn decode_frame(body: &[u8]) -> Result<Envelope, ProtocolError> {
    serde_json::from_slice(body).map_err(ProtocolError::Decode)
}

/// Validate a length prefix and return the body length it announces.
pub fn frame_len(prefix: [u8; 4]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(len)
}
