//! Broker transport contract
//!
//! Concrete broker client libraries are external collaborators; the sink
//! pipeline only depends on the [`BrokerClient`] contract: a brokers list, a
//! synchronous batch publish of `{topic, key, value}` records, and
//! per-record errors on partial failure.
//!
//! Two in-tree implementations exist: [`NullBroker`] accepts and discards
//! (the default when no real client is wired in) and [`MemoryBroker`]
//! captures batches and can be scripted to fail, for tests and local runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::kafka::KafkaSinkConfig;

/// Fixed per-record accounting overhead on the wire (framing, CRC, flags).
const RECORD_OVERHEAD_BYTES: usize = 26;

/// One record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    /// Destination topic.
    pub topic: String,

    /// Partitioning key.
    pub key: Vec<u8>,

    /// Record payload.
    pub value: Vec<u8>,
}

impl BrokerRecord {
    /// Size this record accounts for against the batch byte cap.
    pub fn wire_size(&self) -> usize {
        RECORD_OVERHEAD_BYTES + self.key.len() + self.value.len()
    }
}

/// Transport-level error for a single record or connection.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The broker endpoint could not be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker rejected the record.
    #[error("record rejected: {0}")]
    Rejected(String),
}

/// One record that failed to publish, handed back for retry.
#[derive(Debug)]
pub struct FailedRecord {
    pub record: BrokerRecord,
    pub error: TransportError,
}

/// Partial-failure report from a batch publish.
///
/// Carries ownership of the failed records so the caller can retry exactly
/// that subset.
#[derive(Debug)]
pub struct SendFailure {
    pub failed: Vec<FailedRecord>,
}

impl SendFailure {
    /// Fail an entire batch with one shared error.
    pub fn all(records: Vec<BrokerRecord>, error: TransportError) -> Self {
        Self {
            failed: records
                .into_iter()
                .map(|record| FailedRecord {
                    record,
                    error: error.clone(),
                })
                .collect(),
        }
    }

    /// Take back just the records, dropping the per-record errors.
    pub fn into_records(self) -> Vec<BrokerRecord> {
        self.failed.into_iter().map(|f| f.record).collect()
    }

    /// The error of the first failed record, for logging.
    pub fn first_error(&self) -> Option<&TransportError> {
        self.failed.first().map(|f| &f.error)
    }
}

/// Batch-publishing broker client.
///
/// `send_messages` is a synchronous batch publish: it returns once every
/// record is either accepted or reported back in the failure.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn send_messages(&self, records: Vec<BrokerRecord>) -> Result<(), SendFailure>;
}

/// Builds a [`BrokerClient`] for a sink's configuration.
///
/// One connector is injected into the agent at startup; each producer task
/// gets its own client from it.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, conf: &KafkaSinkConfig) -> Result<Box<dyn BrokerClient>, TransportError>;
}

/// Connector/client that accepts everything and keeps nothing.
///
/// The default transport when no real broker client is wired into the
/// build; delivery is logged at debug level and counted.
#[derive(Debug, Default)]
pub struct NullBroker {
    accepted: AtomicU64,
}

impl NullBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrokerClient for NullBroker {
    async fn send_messages(&self, records: Vec<BrokerRecord>) -> Result<(), SendFailure> {
        self.accepted.fetch_add(records.len() as u64, Ordering::Relaxed);
        tracing::debug!(records = records.len(), "null broker accepted batch");
        Ok(())
    }
}

/// Connector handing out [`NullBroker`] clients.
#[derive(Debug, Default)]
pub struct NullConnector;

#[async_trait]
impl BrokerConnector for NullConnector {
    async fn connect(
        &self,
        conf: &KafkaSinkConfig,
    ) -> Result<Box<dyn BrokerClient>, TransportError> {
        tracing::warn!(
            brokers = ?conf.brokers,
            "no broker client linked into this build; records will be accepted and discarded"
        );
        Ok(Box::new(NullBroker::new()))
    }
}

#[derive(Debug, Default)]
struct MemoryBrokerInner {
    batches: Mutex<Vec<Vec<BrokerRecord>>>,
    send_calls: AtomicU64,
    fail_all: AtomicBool,
}

/// In-memory broker capturing every published batch.
///
/// Cloning shares the captured state, so a test can keep one handle while
/// the connector hands clients to producer tasks. `fail_all(true)` makes
/// every publish fail with the whole batch reported back.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryBrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector handing out clients that share this broker's state.
    pub fn connector(&self) -> Arc<dyn BrokerConnector> {
        Arc::new(MemoryConnector {
            broker: self.clone(),
        })
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn fail_all(&self, fail: bool) {
        self.inner.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Every batch published so far, in publish order.
    pub fn batches(&self) -> Vec<Vec<BrokerRecord>> {
        self.inner.batches.lock().clone()
    }

    /// All records across batches, in publish order.
    pub fn records(&self) -> Vec<BrokerRecord> {
        self.inner.batches.lock().iter().flatten().cloned().collect()
    }

    /// Number of `send_messages` calls, including failed ones.
    pub fn send_calls(&self) -> u64 {
        self.inner.send_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn send_messages(&self, records: Vec<BrokerRecord>) -> Result<(), SendFailure> {
        self.inner.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_all.load(Ordering::SeqCst) {
            return Err(SendFailure::all(
                records,
                TransportError::Unavailable("scripted failure".to_string()),
            ));
        }
        self.inner.batches.lock().push(records);
        Ok(())
    }
}

struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    async fn connect(
        &self,
        _conf: &KafkaSinkConfig,
    ) -> Result<Box<dyn BrokerClient>, TransportError> {
        Ok(Box::new(self.broker.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value_len: usize) -> BrokerRecord {
        BrokerRecord {
            topic: "t".to_string(),
            key: b"k".to_vec(),
            value: vec![0u8; value_len],
        }
    }

    #[test]
    fn test_wire_size_includes_overhead() {
        let r = record(100);
        assert_eq!(r.wire_size(), 26 + 1 + 100);
    }

    #[tokio::test]
    async fn test_memory_broker_captures_batches() {
        let broker = MemoryBroker::new();
        broker
            .send_messages(vec![record(1), record(2)])
            .await
            .unwrap();
        broker.send_messages(vec![record(3)]).await.unwrap();

        assert_eq!(broker.send_calls(), 2);
        let batches = broker.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[tokio::test]
    async fn test_memory_broker_scripted_failure_returns_records() {
        let broker = MemoryBroker::new();
        broker.fail_all(true);

        let err = broker
            .send_messages(vec![record(1), record(2)])
            .await
            .unwrap_err();
        assert_eq!(err.failed.len(), 2);
        assert!(broker.batches().is_empty());

        // recovery path
        broker.fail_all(false);
        broker.send_messages(err.into_records()).await.unwrap();
        assert_eq!(broker.records().len(), 2);
    }

    #[tokio::test]
    async fn test_null_broker_counts() {
        let broker = NullBroker::new();
        broker.send_messages(vec![record(1)]).await.unwrap();
        assert_eq!(broker.accepted(), 1);
    }
}
