//! Agent error types

use thiserror::Error;

use courier_link::LinkError;
use courier_protocol::ProtocolError;
use courier_sinks::SinkError;
use courier_sources::SourceError;

/// Errors from the agent runtime
#[derive(Debug, Error)]
pub enum AgentError {
    /// A Configure payload did not match the expected shape
    #[error("invalid configure payload: {0}")]
    InvalidConfigure(#[source] serde_json::Error),

    /// Source construction or lifecycle failure
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Sink construction or lifecycle failure
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Message encoding failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The controller link refused or lost the message
    #[error(transparent)]
    Link(#[from] LinkError),
}
