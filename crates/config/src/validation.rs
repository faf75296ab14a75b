//! Configuration validation
//!
//! Checks run after parsing and env overrides, before the agent starts.
//! Validation failures are fatal at startup.

use crate::error::{ConfigError, Result};
use crate::Config;

/// Validate a loaded configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_controller(config)?;
    validate_sources(config)?;
    validate_sinks(config)?;
    Ok(())
}

fn validate_controller(config: &Config) -> Result<()> {
    let controller = &config.agent.controller;

    if controller.host.is_empty() {
        return Err(ConfigError::missing_field("controller", "controller", "host"));
    }
    if controller.port == 0 {
        return Err(ConfigError::invalid_value(
            "controller",
            "controller",
            "port",
            "must be non-zero",
        ));
    }
    if controller.tls {
        return Err(ConfigError::invalid_value(
            "controller",
            "controller",
            "tls",
            "no TLS transport is built into this agent",
        ));
    }
    Ok(())
}

fn validate_sources(config: &Config) -> Result<()> {
    for (name, entry) in config.sources.iter() {
        if entry.source_type.is_empty() {
            return Err(ConfigError::missing_field("source", name.clone(), "type"));
        }
    }
    Ok(())
}

fn validate_sinks(config: &Config) -> Result<()> {
    for (name, entry) in config.sinks.iter() {
        if entry.sink_type.is_empty() {
            return Err(ConfigError::missing_field("sink", name.clone(), "type"));
        }
    }
    Ok(())
}
