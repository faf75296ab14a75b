//! Sink error types

use thiserror::Error;

/// Errors from building or operating a sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// The configured type has no registered constructor
    #[error("unknown sink type '{sink_type}' for sink '{name}'")]
    UnknownType { name: String, sink_type: String },

    /// Type-specific options failed to parse
    #[error("invalid configuration for sink '{name}': {source}")]
    InvalidConfig {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// A parsed option holds an unusable value
    #[error("sink '{name}' has invalid {field}: {message}")]
    InvalidValue {
        name: String,
        field: &'static str,
        message: String,
    },

    /// Lifecycle operation on a disabled sink
    #[error("sink '{name}' is disabled")]
    Disabled { name: String },
}

impl SinkError {
    /// Create an InvalidValue error
    pub fn invalid_value(
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            name: name.into(),
            field,
            message: message.into(),
        }
    }
}
