//! Source capability contract and factory
//!
//! Every data source implements [`Source`]; the agent only ever talks to the
//! trait. Sources are built by [`build`] from a [`SourceSkeleton`] carrying
//! the instance name, the read-only agent identity, the raw type-specific
//! options and the event-bus sender. The read end of the bus is owned by the
//! agent's fan-out stage; a source holds no reference back to the agent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use courier_config::AgentHeader;
use courier_protocol::{ActionDescriptor, Event, SchemaMap, SourceStatus};

use crate::dummy::DummySource;
use crate::error::SourceError;
use crate::random::RandomSource;

/// Type name of the inert lifecycle fixture source.
pub const DUMMY_TYPE: &str = "dummy";

/// Type name of the random event generator source.
pub const RANDOM_TYPE: &str = "random";

/// Everything a constructor needs to build a source instance.
pub struct SourceSkeleton {
    /// Instance name from configuration.
    pub name: String,

    /// Read-only agent identity.
    pub agent: AgentHeader,

    /// Whether the instance may be started.
    pub enabled: bool,

    /// Whether the agent starts the instance right after configuration.
    pub autostart: bool,

    /// Type-specific options, parsed by the constructor.
    pub options: serde_json::Value,

    /// Write end of the event bus.
    pub events: mpsc::Sender<Event>,
}

/// Capability contract implemented by every source.
///
/// `start` MUST be idempotent: a second call on a running instance returns
/// `Ok` without spawning duplicates. `stop` MUST be safe on a stopped
/// instance. On a fatal internal error a source transitions to
/// [`SourceStatus::OnError`] and reports `health_check() == false`; the
/// agent never restarts it on its own.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Instance name.
    fn name(&self) -> &str;

    /// Type name this instance was built from.
    fn source_type(&self) -> &'static str;

    /// Current lifecycle status.
    fn status(&self) -> SourceStatus;

    /// Whether the instance may be started.
    fn is_enabled(&self) -> bool;

    /// Liveness probe.
    fn health_check(&self) -> bool;

    /// Arbitrary key-value metadata for the controller.
    fn meta(&self) -> HashMap<String, String>;

    /// Discovered schema, database to table to columns.
    fn schema(&self) -> SchemaMap;

    /// Actions this source accepts through `process`.
    fn available_actions(&self) -> HashMap<String, ActionDescriptor>;

    /// One-time initialization before the first start.
    async fn init(&self) -> Result<(), SourceError>;

    /// Begin producing events.
    async fn start(&self) -> Result<(), SourceError>;

    /// Stop producing events.
    async fn stop(&self) -> Result<(), SourceError>;

    /// Open-ended controller command.
    async fn process(&self, action: &str, payload: &[u8]) -> Result<(), SourceError>;
}

/// Build a source instance for a configured type name.
///
/// Unknown types are a configuration-time error.
pub fn build(source_type: &str, skeleton: SourceSkeleton) -> Result<Arc<dyn Source>, SourceError> {
    match source_type {
        DUMMY_TYPE => Ok(Arc::new(DummySource::new(skeleton))),
        RANDOM_TYPE => Ok(Arc::new(RandomSource::new(skeleton)?)),
        other => Err(SourceError::UnknownType {
            name: skeleton.name,
            source_type: other.to_string(),
        }),
    }
}

/// The lifecycle actions every source supports, used as the base of
/// `available_actions`.
pub(crate) fn lifecycle_actions() -> HashMap<String, ActionDescriptor> {
    let mut actions = HashMap::new();
    actions.insert(
        "start".to_string(),
        ActionDescriptor::new("start producing events"),
    );
    actions.insert(
        "stop".to_string(),
        ActionDescriptor::new("stop producing events"),
    );
    actions.insert(
        "restart".to_string(),
        ActionDescriptor::new("stop then start the source"),
    );
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skeleton(events: mpsc::Sender<Event>) -> SourceSkeleton {
        SourceSkeleton {
            name: "default".to_string(),
            agent: AgentHeader {
                tenant: "test".to_string(),
                environment: "test".to_string(),
                hostname: "test".to_string(),
                uuid: "test".to_string(),
            },
            enabled: true,
            autostart: true,
            options: serde_json::Value::Null,
            events,
        }
    }

    #[test]
    fn test_build_known_types() {
        let (tx, _rx) = mpsc::channel(1);
        let source = build(DUMMY_TYPE, skeleton(tx.clone())).unwrap();
        assert_eq!(source.name(), "default");
        assert_eq!(source.source_type(), "dummy");

        let source = build(RANDOM_TYPE, skeleton(tx)).unwrap();
        assert_eq!(source.source_type(), "random");
    }

    #[test]
    fn test_build_unknown_type_errors() {
        let (tx, _rx) = mpsc::channel(1);
        let err = build("mysqlcdc", skeleton(tx)).unwrap_err();
        assert!(matches!(err, SourceError::UnknownType { .. }));
        assert!(err.to_string().contains("mysqlcdc"));
    }

    #[test]
    fn test_lifecycle_actions_present() {
        let actions = lifecycle_actions();
        assert!(actions.contains_key("start"));
        assert!(actions.contains_key("stop"));
        assert!(actions.contains_key("restart"));
    }
}
