//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading, validating or persisting configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or write the configuration file
    #[error("failed to access config file '{path}': {source}")]
    Io {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to re-serialize the config document on uuid write-back
    #[error("failed to rewrite config: {0}")]
    Rewrite(#[from] toml::ser::Error),

    /// Validation error - required field missing
    #[error("{component} '{name}' is missing required field '{field}'")]
    MissingField {
        /// Component type (e.g. "sink", "source")
        component: &'static str,
        /// Name of the component
        name: String,
        /// Missing field name
        field: &'static str,
    },

    /// Validation error - invalid value
    #[error("{component} '{name}' has invalid {field}: {message}")]
    InvalidValue {
        /// Component type
        component: &'static str,
        /// Name of the component
        name: String,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },

    /// Could not determine the host name from the OS
    #[error("unable to read hostname: {0}")]
    Hostname(#[source] io::Error),
}

impl ConfigError {
    /// Create a MissingField error
    pub fn missing_field(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
    ) -> Self {
        Self::MissingField {
            component,
            name: name.into(),
            field,
        }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            name: name.into(),
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("agent", "agent", "tenant");
        assert!(err.to_string().contains("tenant"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value(
            "controller",
            "controller",
            "tls",
            "no TLS transport is built into this agent",
        );
        assert!(err.to_string().contains("tls"));
        assert!(err.to_string().contains("TLS transport"));
    }
}
