//! Courier Configuration
//!
//! TOML-based configuration with environment overrides and identity
//! bootstrapping. A minimal file only needs a tenant and a controller host;
//! everything else has defaults.
//!
//! # Precedence
//!
//! 1. Environment overrides (`TENANT`, `UUID`, `ENV`, `SECRETKEY`, and
//!    `COURIER_*` for the remaining agent/controller keys)
//! 2. The configuration file
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```toml
//! [agent]
//! tenant = "acme"
//! env = "prod"
//!
//! [agent.controller]
//! host = "controller.internal"
//! port = 8443
//!
//! [sources.orders]
//! type = "random"
//! autostart = true
//!
//! [sinks.main]
//! type = "kafka"
//! topic_prefix = "cdc_"
//! ```
//!
//! The agent uuid is generated on first start and written back into the
//! file, the only state this process ever persists.

mod agent;
mod error;
mod logging;
mod sinks;
mod sources;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use agent::{AgentConfig, AgentHeader, ControllerConfig};
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use sinks::{SinkEntry, SinksConfig};
pub use sources::{SourceEntry, SourcesConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent identity and controller endpoint
    pub agent: AgentConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Data sources
    pub sources: SourcesConfig,

    /// Data sinks
    pub sinks: SinksConfig,
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid TOML,
    /// or fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(s)?;
        config.apply_env_overrides();
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Apply environment variable overrides onto the parsed file.
    ///
    /// The bare names win over everything; the `COURIER_` prefix covers the
    /// remaining identity and controller keys.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, name: &str| {
            if let Some(value) = lookup(name) {
                if !value.is_empty() {
                    *target = value;
                }
            }
        };

        set(&mut self.agent.tenant, "TENANT");
        set(&mut self.agent.uuid, "UUID");
        set(&mut self.agent.env, "ENV");
        set(&mut self.agent.secretkey, "SECRETKEY");

        set(&mut self.agent.tenant, "COURIER_TENANT");
        set(&mut self.agent.uuid, "COURIER_UUID");
        set(&mut self.agent.env, "COURIER_ENV");
        set(&mut self.agent.secretkey, "COURIER_SECRETKEY");
        set(&mut self.agent.hostname, "COURIER_HOSTNAME");
        set(&mut self.agent.controller.host, "COURIER_CONTROLLER_HOST");

        if let Some(port) = lookup("COURIER_CONTROLLER_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.agent.controller.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring unparsable COURIER_CONTROLLER_PORT"),
            }
        }
        if let Some(tls) = lookup("COURIER_CONTROLLER_TLS") {
            match tls.parse::<bool>() {
                Ok(tls) => self.agent.controller.tls = tls,
                Err(_) => tracing::warn!(value = %tls, "ignoring unparsable COURIER_CONTROLLER_TLS"),
            }
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Write a generated uuid back into the configuration file.
///
/// Parses the file as a TOML document, sets `agent.uuid` and rewrites it.
/// This runs at most once per agent lifetime, on first start.
pub fn persist_uuid<P: AsRef<Path>>(path: P, uuid: &str) -> Result<()> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut document: toml::Table = contents.parse()?;
    let agent = document
        .entry("agent")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    match agent.as_table_mut() {
        Some(table) => {
            table.insert("uuid".to_string(), toml::Value::String(uuid.to_string()));
        }
        None => {
            return Err(ConfigError::invalid_value(
                "agent",
                "agent",
                "uuid",
                "the [agent] key is not a table",
            ));
        }
    }

    let rewritten = toml::to_string_pretty(&document)?;
    fs::write(path, rewritten).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    tracing::info!(path = %path.display(), uuid = %uuid, "persisted generated agent uuid");
    Ok(())
}
