//! Dummy source - inert lifecycle fixture
//!
//! Implements the full capability surface but never emits an event. Used to
//! verify controller wiring, dispatch and status reporting without touching
//! a real upstream system.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use courier_protocol::{ActionDescriptor, Event, SchemaMap, SourceStatus};

use crate::error::SourceError;
use crate::source::{lifecycle_actions, Source, SourceSkeleton};

/// Source that does nothing but keep status books.
#[derive(Debug)]
pub struct DummySource {
    name: String,
    enabled: bool,
    status: RwLock<SourceStatus>,

    // Held so the bus stays open while this source is configured, even
    // though nothing is ever sent on it.
    _events: mpsc::Sender<Event>,
}

impl DummySource {
    pub fn new(skeleton: SourceSkeleton) -> Self {
        Self {
            name: skeleton.name,
            enabled: skeleton.enabled,
            status: RwLock::new(SourceStatus::Stopped),
            _events: skeleton.events,
        }
    }
}

#[async_trait]
impl Source for DummySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> &'static str {
        crate::source::DUMMY_TYPE
    }

    fn status(&self) -> SourceStatus {
        *self.status.read()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn health_check(&self) -> bool {
        *self.status.read() != SourceStatus::OnError
    }

    fn meta(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn schema(&self) -> SchemaMap {
        SchemaMap::new()
    }

    fn available_actions(&self) -> HashMap<String, ActionDescriptor> {
        lifecycle_actions()
    }

    async fn init(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), SourceError> {
        if !self.enabled {
            return Err(SourceError::Disabled {
                name: self.name.clone(),
            });
        }
        *self.status.write() = SourceStatus::Running;
        tracing::debug!(source = %self.name, "dummy source started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        *self.status.write() = SourceStatus::Stopped;
        tracing::debug!(source = %self.name, "dummy source stopped");
        Ok(())
    }

    async fn process(&self, action: &str, _payload: &[u8]) -> Result<(), SourceError> {
        tracing::debug!(source = %self.name, action = %action, "dummy source ignoring action");
        Ok(())
    }
}
