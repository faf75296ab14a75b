//! Consumer and producer tasks of the kafka sink
//!
//! The consumer turns events into broker records; each producer drains the
//! shared resend queue into byte-capped batches and publishes them. A
//! producer walks `Init -> Connecting -> Ready` and bounces between `Ready`
//! and `Retrying` on transport errors until its retry budget is gone, then
//! goes `Closed` with a fault posted to the agent.

use std::sync::Arc;
use std::time::Duration;

use crossfire::{MAsyncRx, MAsyncTx};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use courier_protocol::{Event, SinkStatus};

use crate::common::{SinkFault, SinkMetrics};
use crate::transport::{BrokerClient, BrokerConnector, BrokerRecord};
use crate::util::cipher::{CipherError, PayloadCipher};

use super::{KafkaSinkConfig, ProducerItem};

/// Retries of a batch's failed subset before the producer gives up.
const RETRY_LIMIT: usize = 20;

/// Age-based flush period: a batch never waits longer than this.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Why an event could not become a broker record.
#[derive(Debug)]
pub(super) enum EncodeError {
    /// JSON serialization failed.
    Serialize(serde_json::Error),

    /// Encryption failed.
    Encrypt(CipherError),

    /// Encoded payload exceeds the size threshold.
    Oversize { size: usize, threshold: usize },
}

/// Turn one event into a publishable record.
///
/// Topic: the fixed `topic` when set, otherwise derived from the prefix and
/// the event's environment (and database for SQL events). Key: the primary
/// key for SQL events, the environment for generic events, the original key
/// for pass-through records. Encrypted payloads are size-gated after
/// encryption since that is what travels.
pub(super) fn encode_event(
    event: &Event,
    conf: &KafkaSinkConfig,
    cipher: Option<&PayloadCipher>,
) -> Result<BrokerRecord, EncodeError> {
    let (topic, key, payload) = match event {
        Event::Sql(e) => {
            let topic = if conf.topic.is_empty() {
                format!("{}{}_{}", conf.topic_prefix, e.environment, e.database)
            } else {
                conf.topic.clone()
            };
            let payload = serde_json::to_vec(e).map_err(EncodeError::Serialize)?;
            (topic, e.primary_key.clone().into_bytes(), payload)
        }
        Event::Generic(e) => {
            let topic = if conf.topic.is_empty() {
                format!("{}{}", conf.topic_prefix, e.environment)
            } else {
                conf.topic.clone()
            };
            let payload = serde_json::to_vec(e).map_err(EncodeError::Serialize)?;
            (topic, e.environment.clone().into_bytes(), payload)
        }
        Event::Transport(m) => {
            let topic = if conf.topic.is_empty() {
                format!("{}{}", conf.topic_prefix, m.topic)
            } else {
                conf.topic.clone()
            };
            (topic, m.key.clone(), m.value.clone())
        }
    };

    let value = match cipher {
        Some(cipher) => cipher.encrypt(&payload).map_err(EncodeError::Encrypt)?,
        None => payload,
    };

    if value.len() > conf.max_message_bytes {
        return Err(EncodeError::Oversize {
            size: value.len(),
            threshold: conf.max_message_bytes,
        });
    }

    Ok(BrokerRecord { topic, key, value })
}

/// The consumer task: input channel to resend queue.
pub(super) async fn consumer(
    sink: String,
    conf: Arc<KafkaSinkConfig>,
    cipher: Option<Arc<PayloadCipher>>,
    input: Arc<Mutex<mpsc::Receiver<Event>>>,
    resend: MAsyncTx<ProducerItem>,
    metrics: Arc<SinkMetrics>,
    cancel: CancellationToken,
) {
    // held for the whole run; released when the task exits so a later
    // start() can pick the receiver up again
    let mut rx = input.lock().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    // closed upstream means end-of-stream, not an error
                    tracing::debug!(sink = %sink, "input channel closed, consumer draining out");
                    return;
                };
                metrics.event_received();

                match encode_event(&event, &conf, cipher.as_deref()) {
                    Ok(record) => {
                        tracing::trace!(sink = %sink, topic = %record.topic, "queueing record");
                        if resend.send(ProducerItem::Record(record)).await.is_err() {
                            tracing::debug!(sink = %sink, "resend queue closed, consumer exiting");
                            return;
                        }
                    }
                    Err(EncodeError::Oversize { size, threshold }) => {
                        metrics.oversize_drop();
                        tracing::warn!(
                            sink = %sink,
                            size,
                            threshold,
                            "skipping event over the size threshold"
                        );
                    }
                    Err(EncodeError::Serialize(e)) => {
                        metrics.encode_error();
                        tracing::error!(sink = %sink, error = %e, "event serialization failed");
                    }
                    Err(EncodeError::Encrypt(e)) => {
                        metrics.encode_error();
                        tracing::error!(sink = %sink, error = %e, "event encryption failed");
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!(sink = %sink, "consumer cancelled");
                return;
            }
        }
    }
}

/// One producer task: resend queue to broker, in byte-capped batches.
#[allow(clippy::too_many_arguments)]
pub(super) async fn producer(
    id: usize,
    sink: String,
    conf: Arc<KafkaSinkConfig>,
    connector: Arc<dyn BrokerConnector>,
    resend: MAsyncRx<ProducerItem>,
    metrics: Arc<SinkMetrics>,
    status: Arc<RwLock<SinkStatus>>,
    faults: mpsc::Sender<SinkFault>,
    cancel: CancellationToken,
) {
    // Init
    if let Err(message) = conf.validate() {
        fail(
            &sink,
            id,
            &status,
            &faults,
            format!("producer configuration invalid: {message}"),
        )
        .await;
        return;
    }

    // Connecting
    tracing::debug!(sink = %sink, producer = id, "producer connecting");
    let client = match connector.connect(&conf).await {
        Ok(client) => client,
        Err(e) => {
            fail(
                &sink,
                id,
                &status,
                &faults,
                format!("producer connect failed: {e}"),
            )
            .await;
            return;
        }
    };
    tracing::debug!(sink = %sink, producer = id, "producer ready");

    let mut batch: Vec<BrokerRecord> = Vec::new();
    let mut batch_bytes = 0usize;

    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; swallow it so it cannot split
    // an in-progress batch
    ticker.tick().await;

    loop {
        tokio::select! {
            item = resend.recv() => match item {
                Ok(ProducerItem::Record(record)) => {
                    let size = record.wire_size();
                    if size > conf.max_message_bytes {
                        metrics.oversize_drop();
                        tracing::warn!(
                            sink = %sink,
                            producer = id,
                            size,
                            threshold = conf.max_message_bytes,
                            "skipping record over the size threshold"
                        );
                    } else if batch_bytes + size <= conf.max_message_bytes {
                        batch.push(record);
                        batch_bytes += size;
                    } else {
                        if flush(&sink, id, client.as_ref(), &mut batch, &mut batch_bytes, &metrics, &status, &faults).await.is_err() {
                            return;
                        }
                        batch_bytes = record.wire_size();
                        batch.push(record);
                    }
                }
                Ok(ProducerItem::Flush) => {
                    if flush(&sink, id, client.as_ref(), &mut batch, &mut batch_bytes, &metrics, &status, &faults).await.is_err() {
                        return;
                    }
                }
                Err(_) => {
                    // consumer gone: flush what we have and leave
                    let _ = flush(&sink, id, client.as_ref(), &mut batch, &mut batch_bytes, &metrics, &status, &faults).await;
                    tracing::debug!(sink = %sink, producer = id, "resend queue closed, producer exiting");
                    return;
                }
            },
            _ = ticker.tick() => {
                if !batch.is_empty()
                    && flush(&sink, id, client.as_ref(), &mut batch, &mut batch_bytes, &metrics, &status, &faults).await.is_err()
                {
                    return;
                }
            }
            _ = cancel.cancelled() => {
                let _ = flush(&sink, id, client.as_ref(), &mut batch, &mut batch_bytes, &metrics, &status, &faults).await;
                tracing::debug!(sink = %sink, producer = id, "producer closed");
                return;
            }
        }
    }
}

/// Publish the current batch, retrying only the failed subset.
///
/// `Err` means the retry budget is exhausted and a fault was posted; the
/// producer must exit.
#[allow(clippy::too_many_arguments)]
async fn flush(
    sink: &str,
    id: usize,
    client: &dyn BrokerClient,
    batch: &mut Vec<BrokerRecord>,
    batch_bytes: &mut usize,
    metrics: &SinkMetrics,
    status: &RwLock<SinkStatus>,
    faults: &mpsc::Sender<SinkFault>,
) -> Result<(), ()> {
    if batch.is_empty() {
        return Ok(());
    }

    let count = batch.len();
    let bytes = *batch_bytes;
    let mut pending = std::mem::take(batch);
    *batch_bytes = 0;

    let mut retries = 0usize;
    loop {
        match client.send_messages(pending).await {
            Ok(()) => {
                metrics.batch_flushed(count as u64, bytes as u64);
                if retries > 0 {
                    tracing::debug!(sink = %sink, producer = id, retries, "producer ready again");
                }
                return Ok(());
            }
            Err(failure) => {
                let error = failure
                    .first_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown transport error".to_string());

                if retries == RETRY_LIMIT {
                    fail(
                        sink,
                        id,
                        status,
                        faults,
                        format!(
                            "failed to publish batch after {} attempts: {error}",
                            retries + 1
                        ),
                    )
                    .await;
                    return Err(());
                }

                retries += 1;
                metrics.retry();
                tracing::warn!(
                    sink = %sink,
                    producer = id,
                    retry = retries,
                    failed = failure.failed.len(),
                    error = %error,
                    "batch publish failed, retrying failed records"
                );
                pending = failure.into_records();
            }
        }
    }
}

/// Transition the sink to `OnError` and tell the agent.
async fn fail(
    sink: &str,
    id: usize,
    status: &RwLock<SinkStatus>,
    faults: &mpsc::Sender<SinkFault>,
    error: String,
) {
    tracing::error!(sink = %sink, producer = id, error = %error, "producer closed on fatal error");
    *status.write() = SinkStatus::OnError;
    let fault = SinkFault {
        sink: sink.to_string(),
        error,
    };
    if faults.send(fault).await.is_err() {
        tracing::warn!(sink = %sink, "agent fault channel closed, fault not reported");
    }
}
