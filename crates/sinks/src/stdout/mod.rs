//! Stdout Sink - Human-readable debug output
//!
//! Prints each event as one JSON line. Not meant for production volume;
//! useful for verifying a pipeline before pointing it at a broker.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use courier_protocol::{Event, SinkStatus};

use crate::common::SinkMetrics;
use crate::error::SinkError;
use crate::sink::{Sink, SinkSkeleton, INPUT_QUEUE_SIZE};

struct Run {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Sink printing events to stdout.
pub struct StdoutSink {
    name: String,
    enabled: bool,
    status: Arc<RwLock<SinkStatus>>,
    metrics: Arc<SinkMetrics>,

    input_tx: mpsc::Sender<Event>,
    input_rx: Arc<Mutex<mpsc::Receiver<Event>>>,

    run: Mutex<Option<Run>>,
}

impl std::fmt::Debug for StdoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdoutSink")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl StdoutSink {
    pub fn new(skeleton: SinkSkeleton) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_SIZE);
        Self {
            name: skeleton.name,
            enabled: skeleton.enabled,
            status: Arc::new(RwLock::new(SinkStatus::Stopped)),
            metrics: Arc::new(SinkMetrics::new()),
            input_tx,
            input_rx: Arc::new(Mutex::new(input_rx)),
            run: Mutex::new(None),
        }
    }

    /// Get reference to metrics
    pub fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn sink_type(&self) -> &'static str {
        crate::sink::STDOUT_TYPE
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
            if !existing.task.is_finished() {
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(printer(
            self.name.clone(),
            Arc::clone(&self.input_rx),
            Arc::clone(&self.metrics),
            cancel.clone(),
        ));

        *run = Some(Run { cancel, task });
        *self.status.write() = SinkStatus::Running;
        tracing::info!(sink = %self.name, "stdout sink started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        let mut run = self.run.lock().await;
        if let Some(run) = run.take() {
            run.cancel.cancel();
            if let Err(e) = run.task.await {
                tracing::warn!(sink = %self.name, error = %e, "printer task panicked");
            }
        }
        *self.status.write() = SinkStatus::Stopped;
        tracing::info!(sink = %self.name, "stdout sink stopped");
        Ok(())
    }

    async fn process(&self, action: &str, _payload: &[u8]) -> Result<(), SinkError> {
        tracing::debug!(sink = %self.name, action = %action, "ignoring unknown action");
        Ok(())
    }
}

async fn printer(
    sink: String,
    input: Arc<Mutex<mpsc::Receiver<Event>>>,
    metrics: Arc<SinkMetrics>,
    cancel: CancellationToken,
) {
    let mut rx = input.lock().await;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { return };
                metrics.event_received();
                match serde_json::to_string(&event) {
                    Ok(line) => {
                        println!("{line}");
                        metrics.batch_flushed(1, line.len() as u64);
                    }
                    Err(e) => {
                        metrics.encode_error();
                        tracing::error!(sink = %sink, error = %e, "event serialization failed");
                    }
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}
