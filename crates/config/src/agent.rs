//! Agent identity and controller endpoint configuration
//!
//! The `[agent]` section: who this agent is (tenant, environment, uuid,
//! secret key) and where its controller lives. The hostname is read from the
//! OS; the uuid is generated once and written back to the config file so it
//! stays stable across restarts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, Result};

/// The `[agent]` configuration section
///
/// # Example
///
/// ```toml
/// [agent]
/// tenant = "acme"
/// env = "prod"
/// secretkey = "s3cr3t"
///
/// [agent.controller]
/// host = "controller.internal"
/// port = 8443
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Host name; auto-filled from the OS when empty
    pub hostname: String,

    /// Tenant identifier
    pub tenant: String,

    /// Environment tag (e.g. "prod"); stamped on every event
    pub env: String,

    /// Agent uuid; auto-generated and persisted when absent or not a v4 UUID
    pub uuid: String,

    /// Shared secret presented to the controller at connect
    pub secretkey: String,

    /// Controller endpoint
    pub controller: ControllerConfig,
}

/// The `[agent.controller]` subsection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller host
    pub host: String,

    /// Controller port
    /// Default: 8443
    pub port: u16,

    /// Whether to wrap the link in TLS
    /// Default: false (and currently rejected by validation; no TLS stack is linked)
    pub tls: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8443,
            tls: false,
        }
    }
}

impl AgentConfig {
    /// Fill `hostname` from the OS when the config did not set it.
    pub fn ensure_hostname(&mut self) -> Result<()> {
        if !self.hostname.is_empty() {
            return Ok(());
        }
        let name = hostname::get().map_err(ConfigError::Hostname)?;
        self.hostname = name.to_string_lossy().into_owned();
        Ok(())
    }

    /// Make sure `uuid` holds a valid v4 UUID, generating one if needed.
    ///
    /// Returns `true` when a new uuid was generated (the caller should
    /// persist it back to the config file).
    pub fn ensure_uuid(&mut self) -> bool {
        if is_valid_v4(&self.uuid) {
            return false;
        }
        let generated = Uuid::new_v4().to_string();
        tracing::info!(uuid = %generated, "generated new agent uuid");
        self.uuid = generated;
        true
    }

    /// The read-only identity record handed to sources and sinks.
    pub fn header(&self) -> AgentHeader {
        AgentHeader {
            tenant: self.tenant.clone(),
            environment: self.env.clone(),
            hostname: self.hostname.clone(),
            uuid: self.uuid.clone(),
        }
    }
}

/// Check that a string parses as a version-4 UUID.
fn is_valid_v4(s: &str) -> bool {
    Uuid::parse_str(s)
        .map(|u| u.get_version_num() == 4)
        .unwrap_or(false)
}

/// Read-only agent identity passed into source and sink constructors.
///
/// Instances get this record and their channel endpoints, nothing else; no
/// back-pointer to the agent exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentHeader {
    pub tenant: String,
    pub environment: String,
    pub hostname: String,
    pub uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_defaults() {
        let config = ControllerConfig::default();
        assert!(config.host.is_empty());
        assert_eq!(config.port, 8443);
        assert!(!config.tls);
    }

    #[test]
    fn test_ensure_uuid_generates_v4() {
        let mut config = AgentConfig::default();
        assert!(config.ensure_uuid());
        let parsed = Uuid::parse_str(&config.uuid).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_ensure_uuid_keeps_valid_value() {
        let existing = Uuid::new_v4().to_string();
        let mut config = AgentConfig {
            uuid: existing.clone(),
            ..AgentConfig::default()
        };
        assert!(!config.ensure_uuid());
        assert_eq!(config.uuid, existing);
    }

    #[test]
    fn test_ensure_uuid_replaces_non_v4() {
        // nil uuid parses but is not version 4
        let mut config = AgentConfig {
            uuid: "00000000-0000-0000-0000-000000000000".to_string(),
            ..AgentConfig::default()
        };
        assert!(config.ensure_uuid());
        assert_ne!(config.uuid, "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_ensure_hostname_fills_from_os() {
        let mut config = AgentConfig::default();
        config.ensure_hostname().unwrap();
        assert!(!config.hostname.is_empty());
    }

    #[test]
    fn test_ensure_hostname_keeps_explicit_value() {
        let mut config = AgentConfig {
            hostname: "pinned-host".to_string(),
            ..AgentConfig::default()
        };
        config.ensure_hostname().unwrap();
        assert_eq!(config.hostname, "pinned-host");
    }

    #[test]
    fn test_header_copies_identity() {
        let config = AgentConfig {
            hostname: "h1".to_string(),
            tenant: "t1".to_string(),
            env: "prod".to_string(),
            uuid: "u1".to_string(),
            secretkey: "never-in-header".to_string(),
            controller: ControllerConfig::default(),
        };
        let header = config.header();
        assert_eq!(header.tenant, "t1");
        assert_eq!(header.environment, "prod");
        assert_eq!(header.hostname, "h1");
        assert_eq!(header.uuid, "u1");
    }
}
