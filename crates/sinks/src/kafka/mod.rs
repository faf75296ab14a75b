//! Kafka Sink - Batching broker delivery
//!
//! The data-plane workhorse: one consumer task turns events into
//! `{topic, key, value}` records (serialize, encrypt, size-gate) and feeds a
//! bounded resend queue; `nbproducer` producer tasks drain the queue into
//! byte-capped batches and publish them through the configured
//! [`BrokerConnector`], retrying only the failed subset of each batch.
//!
//! # Ordering
//!
//! With `nbproducer > 1` ordering across producers is NOT preserved, even
//! within a key. Deployments that need per-key ordering must run with
//! `nbproducer = 1`.
//!
//! # Failure
//!
//! After 20 failed retries of one batch the producer posts a
//! [`SinkFault`](crate::SinkFault) and the sink transitions to `OnError`.
//! The agent keeps running; the controller replaces the sink via Configure.

mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossfire::MAsyncTx;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use courier_protocol::{Event, SinkStatus};

use crate::common::{SinkFault, SinkMetrics};
use crate::error::SinkError;
use crate::sink::{Sink, SinkSkeleton, INPUT_QUEUE_SIZE};
use crate::transport::{BrokerConnector, BrokerRecord};
use crate::util::cipher::PayloadCipher;

/// Capacity of the resend queue between the consumer and the producers.
const RESEND_QUEUE_SIZE: usize = 10_000;

/// How long `stop` waits for each worker task before abandoning it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// SASL credentials for the broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerCredentials {
    pub user: String,
    pub password: String,
}

/// Configuration for the kafka sink
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaSinkConfig {
    /// Broker addresses
    pub brokers: Vec<String>,

    /// Fixed destination topic; when empty the topic is derived per event
    /// from `topic_prefix`, the environment and the database
    pub topic: String,

    /// Prefix for derived topic names
    pub topic_prefix: String,

    /// Client identifier presented to the brokers
    pub client_id: String,

    /// Whether the broker connection uses TLS
    pub tls: bool,

    /// Inclusive upper bound on both per-record and per-batch wire size
    /// Default: 1000000
    #[serde(rename = "maxmessagebytes")]
    pub max_message_bytes: usize,

    /// Number of producer tasks draining the resend queue.
    /// More than one trades away ordering, even within a key.
    /// Default: 1
    #[serde(rename = "nbproducer")]
    pub nb_producer: usize,

    /// When non-empty, payloads are AES-256-GCM encrypted with
    /// key = SHA-256(secret)
    pub secret: String,

    /// SASL credentials; used when `client_id` is empty
    pub producer: Option<BrokerCredentials>,
}

impl Default for KafkaSinkConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topic: String::new(),
            topic_prefix: String::new(),
            client_id: String::new(),
            tls: false,
            max_message_bytes: 1_000_000,
            nb_producer: 1,
            secret: String::new(),
            producer: None,
        }
    }
}

impl KafkaSinkConfig {
    /// Producer-side validation, run again at each producer's init.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_message_bytes == 0 {
            return Err("maxmessagebytes must be positive".to_string());
        }
        if self.nb_producer == 0 {
            return Err("nbproducer must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Work item on the resend queue.
enum ProducerItem {
    /// A record to batch and deliver.
    Record(BrokerRecord),

    /// Barrier asking the receiving producer to flush its current batch.
    Flush,
}

/// Handles of one running pipeline instance.
struct Run {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    resend: MAsyncTx<ProducerItem>,
}

/// Batching broker sink.
pub struct KafkaSink {
    name: String,
    enabled: bool,
    conf: Arc<KafkaSinkConfig>,
    cipher: Option<Arc<PayloadCipher>>,
    connector: Arc<dyn BrokerConnector>,

    status: Arc<RwLock<SinkStatus>>,
    metrics: Arc<SinkMetrics>,
    faults: mpsc::Sender<SinkFault>,

    input_tx: mpsc::Sender<Event>,
    input_rx: Arc<Mutex<mpsc::Receiver<Event>>>,

    run: Mutex<Option<Run>>,
}

impl std::fmt::Debug for KafkaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSink")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl KafkaSink {
    /// Build a sink from its skeleton and the injected broker connector.
    pub fn new(
        skeleton: SinkSkeleton,
        connector: Arc<dyn BrokerConnector>,
    ) -> Result<Self, SinkError> {
        let conf: KafkaSinkConfig = match &skeleton.options {
            serde_json::Value::Null => KafkaSinkConfig::default(),
            options => serde_json::from_value(options.clone()).map_err(|source| {
                SinkError::InvalidConfig {
                    name: skeleton.name.clone(),
                    source,
                }
            })?,
        };

        if let Err(message) = conf.validate() {
            return Err(SinkError::invalid_value(skeleton.name, "options", message));
        }

        let cipher = if conf.secret.is_empty() {
            None
        } else {
            let cipher = PayloadCipher::new(&conf.secret).map_err(|e| {
                SinkError::invalid_value(skeleton.name.clone(), "secret", e.to_string())
            })?;
            Some(Arc::new(cipher))
        };

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_SIZE);

        Ok(Self {
            name: skeleton.name,
            enabled: skeleton.enabled,
            conf: Arc::new(conf),
            cipher,
            connector,
            status: Arc::new(RwLock::new(SinkStatus::Stopped)),
            metrics: Arc::new(SinkMetrics::new()),
            faults: skeleton.faults,
            input_tx,
            input_rx: Arc::new(Mutex::new(input_rx)),
            run: Mutex::new(None),
        })
    }

    /// Get reference to metrics
    pub fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }
}

#[async_trait]
impl Sink for KafkaSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_type(&self) -> &'static str {
        crate::sink::KAFKA_TYPE
    }

    fn status(&self) -> SinkStatus {
        *self.status.read()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn health_check(&self) -> bool {
        *self.status.read() != SinkStatus::OnError
    }

    fn input(&self) -> mpsc::Sender<Event> {
        self.input_tx.clone()
    }

    async fn start(&self) -> Result<(), SinkError> {
        if !self.enabled {
            return Err(SinkError::Disabled {
                name: self.name.clone(),
            });
        }

        let mut run = self.run.lock().await;
        if let Some(existing) = run.as_ref() {
            if existing.tasks.iter().any(|t| !t.is_finished()) {
                tracing::debug!(sink = %self.name, "start on running sink, nothing to do");
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        let (resend_tx, resend_rx) =
            crossfire::mpmc::bounded_async::<ProducerItem>(RESEND_QUEUE_SIZE);

        tracing::debug!(
            sink = %self.name,
            nb_producer = self.conf.nb_producer,
            threshold = self.conf.max_message_bytes,
            "starting sink producers"
        );

        let mut tasks = Vec::with_capacity(self.conf.nb_producer + 1);
        for id in 0..self.conf.nb_producer {
            tasks.push(tokio::spawn(worker::producer(
                id,
                self.name.clone(),
                Arc::clone(&self.conf),
                Arc::clone(&self.connector),
                resend_rx.clone(),
                Arc::clone(&self.metrics),
                Arc::clone(&self.status),
                self.faults.clone(),
                cancel.clone(),
            )));
        }

        tasks.push(tokio::spawn(worker::consumer(
            self.name.clone(),
            Arc::clone(&self.conf),
            self.cipher.clone(),
            Arc::clone(&self.input_rx),
            resend_tx.clone(),
            Arc::clone(&self.metrics),
            cancel.clone(),
        )));

        *run = Some(Run {
            cancel,
            tasks,
            resend: resend_tx,
        });
        *self.status.write() = SinkStatus::Running;
        tracing::info!(sink = %self.name, "kafka sink started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        let mut run = self.run.lock().await;
        if let Some(run) = run.take() {
            run.cancel.cancel();
            for task in run.tasks {
                match tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(sink = %self.name, error = %e, "sink worker panicked")
                    }
                    Err(_) => {
                        tracing::warn!(sink = %self.name, "sink worker did not stop within timeout")
                    }
                }
            }

            // whatever is still buffered was not delivered and never will be
            let mut dropped = 0u64;
            {
                let mut rx = self.input_rx.lock().await;
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
            }
            if dropped > 0 {
                self.metrics.shutdown_drop(dropped);
                tracing::warn!(sink = %self.name, dropped, "dropped buffered events at shutdown");
            }
        }

        *self.status.write() = SinkStatus::Stopped;
        tracing::info!(sink = %self.name, "kafka sink stopped");
        Ok(())
    }

    async fn process(&self, action: &str, _payload: &[u8]) -> Result<(), SinkError> {
        match action {
            "flush" => {
                let run = self.run.lock().await;
                if let Some(run) = run.as_ref() {
                    // best effort: a saturated queue is flushing already
                    for _ in 0..self.conf.nb_producer {
                        if run.resend.try_send(ProducerItem::Flush).is_err() {
                            tracing::debug!(sink = %self.name, "resend queue full, skipping flush barrier");
                            break;
                        }
                    }
                }
                Ok(())
            }
            other => {
                tracing::debug!(sink = %self.name, action = %other, "ignoring unknown action");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "kafka_test.rs"]
mod kafka_test;
