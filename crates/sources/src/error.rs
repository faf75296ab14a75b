//! Source error types

use thiserror::Error;

/// Errors from building or operating a source
#[derive(Debug, Error)]
pub enum SourceError {
    /// The configured type has no registered constructor
    #[error("unknown source type '{source_type}' for source '{name}'")]
    UnknownType { name: String, source_type: String },

    /// Type-specific options failed to parse
    #[error("invalid configuration for source '{name}': {source}")]
    InvalidConfig {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Lifecycle operation on a disabled source
    #[error("source '{name}' is disabled")]
    Disabled { name: String },

    /// The event bus was closed while the source was emitting
    #[error("source '{name}' lost its output channel")]
    ChannelClosed { name: String },
}
