//! Sink capability contract and factory
//!
//! Every delivery target implements [`Sink`]. A sink owns its bounded input
//! channel; the agent's fan-out stage holds the write end and blocks when
//! the sink is saturated, which is the backpressure story end to end.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use courier_config::AgentHeader;
use courier_protocol::{Event, SinkStatus};

use crate::common::SinkFault;
use crate::error::SinkError;
use crate::kafka::KafkaSink;
use crate::stdout::StdoutSink;
use crate::transport::BrokerConnector;

/// Type name of the batching broker sink.
pub const KAFKA_TYPE: &str = "kafka";

/// Type name of the debug stdout sink.
pub const STDOUT_TYPE: &str = "stdout";

/// Capacity of every sink's input channel.
///
/// When full, the fan-out stage blocks; sources slow down through the bus.
pub const INPUT_QUEUE_SIZE: usize = 10_000;

/// Everything a constructor needs to build a sink instance.
pub struct SinkSkeleton {
    /// Instance name from configuration.
    pub name: String,

    /// Read-only agent identity.
    pub agent: AgentHeader,

    /// Whether the instance may be started.
    pub enabled: bool,

    /// Type-specific options, parsed by the constructor.
    pub options: serde_json::Value,

    /// Where fatal sink failures are reported.
    pub faults: mpsc::Sender<SinkFault>,
}

/// Capability contract implemented by every sink.
///
/// Same lifecycle rules as sources: `start` is idempotent, `stop` is safe
/// on a stopped instance. A sink that exhausts its delivery retry budget
/// transitions to [`SinkStatus::OnError`], posts a [`SinkFault`] and stays
/// down until the controller replaces it.
#[async_trait]
pub trait Sink: Send + Sync + std::fmt::Debug {
    /// Instance name.
    fn name(&self) -> &str;

    /// Type name this instance was built from.
    fn sink_type(&self) -> &'static str;

    /// Current lifecycle status.
    fn status(&self) -> SinkStatus;

    /// Whether the instance may be started.
    fn is_enabled(&self) -> bool;

    /// Liveness probe.
    fn health_check(&self) -> bool;

    /// Write end of the sink's bounded input channel.
    fn input(&self) -> mpsc::Sender<Event>;

    /// Begin consuming and delivering events.
    async fn start(&self) -> Result<(), SinkError>;

    /// Stop delivering; flushes in-flight batches first.
    async fn stop(&self) -> Result<(), SinkError>;

    /// Open-ended controller command.
    async fn process(&self, action: &str, payload: &[u8]) -> Result<(), SinkError>;
}

/// Build a sink instance for a configured type name.
///
/// The connector is the seam where a concrete broker client library plugs
/// in; non-broker sinks ignore it.
pub fn build(
    sink_type: &str,
    skeleton: SinkSkeleton,
    connector: Arc<dyn BrokerConnector>,
) -> Result<Arc<dyn Sink>, SinkError> {
    match sink_type {
        KAFKA_TYPE => Ok(Arc::new(KafkaSink::new(skeleton, connector)?)),
        STDOUT_TYPE => Ok(Arc::new(StdoutSink::new(skeleton))),
        other => Err(SinkError::UnknownType {
            name: skeleton.name,
            sink_type: other.to_string(),
        }),
    }
}
