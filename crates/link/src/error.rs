//! Link error types

use thiserror::Error;

use courier_protocol::ProtocolError;

/// Errors from the controller link
#[derive(Debug, Error)]
pub enum LinkError {
    /// The configured endpoint can never connect
    #[error("invalid controller endpoint '{endpoint}'")]
    InvalidEndpoint { endpoint: String },

    /// No connection is up; the send failed fast
    #[error("link disconnected")]
    Disconnected,

    /// The link task has exited; no more sends are possible
    #[error("link closed")]
    Closed,

    /// Socket-level failure on the current connection
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or JSON failure on the current connection
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
