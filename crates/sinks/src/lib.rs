//! Courier Sinks
//!
//! The `Sink` capability contract, the factory building sinks from
//! configuration entries, and the bundled sink types:
//!
//! - `kafka` - the batching broker pipeline: serialize, encrypt, size-gate,
//!   batch under a byte cap, deliver with bounded retry
//! - `stdout` - prints events as JSON lines for debugging
//!
//! Concrete broker client libraries stay outside this crate; they plug in
//! through the [`BrokerConnector`] seam.

mod common;
mod error;
pub mod kafka;
mod sink;
pub mod stdout;
pub mod transport;
pub mod util;

pub use common::{SinkFault, SinkMetrics, SinkMetricsSnapshot};
pub use error::SinkError;
pub use kafka::{KafkaSink, KafkaSinkConfig};
pub use sink::{build, Sink, SinkSkeleton, INPUT_QUEUE_SIZE, KAFKA_TYPE, STDOUT_TYPE};
pub use stdout::StdoutSink;
pub use transport::{
    BrokerClient, BrokerConnector, BrokerRecord, FailedRecord, MemoryBroker, NullBroker,
    NullConnector, SendFailure, TransportError,
};
