//! Random source - interval event generator
//!
//! Emits random [`GenericEvent`]s at a configurable interval. Exercises the
//! whole data plane (fan-out, batching, encryption, size gating) without an
//! upstream database, and doubles as a load generator for sink tuning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use courier_protocol::{ActionDescriptor, Event, GenericEvent, SchemaMap, SourceStatus};

use crate::common::SourceMetrics;
use crate::error::SourceError;
use crate::source::{lifecycle_actions, Source, SourceSkeleton};

/// Configuration for the random source
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RandomSourceConfig {
    /// Interval between generated events
    /// Default: 1s
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Size of the random payload in bytes
    /// Default: 64
    pub payload_bytes: usize,
}

impl Default for RandomSourceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            payload_bytes: 64,
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Source generating random events at a fixed interval.
pub struct RandomSource {
    name: String,
    environment: String,
    enabled: bool,
    conf: RandomSourceConfig,
    events: mpsc::Sender<Event>,
    status: Arc<RwLock<SourceStatus>>,
    metrics: Arc<SourceMetrics>,
    sequence: Arc<AtomicU64>,
    run: Mutex<Option<RunHandle>>,
}

impl std::fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomSource")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl RandomSource {
    pub fn new(skeleton: SourceSkeleton) -> Result<Self, SourceError> {
        let conf: RandomSourceConfig = match &skeleton.options {
            serde_json::Value::Null => RandomSourceConfig::default(),
            options => serde_json::from_value(options.clone()).map_err(|source| {
                SourceError::InvalidConfig {
                    name: skeleton.name.clone(),
                    source,
                }
            })?,
        };

        Ok(Self {
            name: skeleton.name,
            environment: skeleton.agent.environment,
            enabled: skeleton.enabled,
            conf,
            events: skeleton.events,
            status: Arc::new(RwLock::new(SourceStatus::Stopped)),
            metrics: Arc::new(SourceMetrics::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            run: Mutex::new(None),
        })
    }

    /// Get reference to metrics
    pub fn metrics(&self) -> &SourceMetrics {
        &self.metrics
    }

    fn make_event(environment: &str, sequence: u64, payload_bytes: usize) -> Event {
        let data: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(payload_bytes)
            .map(char::from)
            .collect();

        let value = serde_json::json!({ "seq": sequence, "data": data });

        Event::Generic(GenericEvent {
            environment: environment.to_string(),
            key: environment.to_string(),
            value: value.to_string().into_bytes(),
            timestamp: Utc::now(),
        })
    }

    async fn emit_once(&self) -> Result<(), SourceError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let event = Self::make_event(&self.environment, sequence, self.conf.payload_bytes);
        self.events
            .send(event)
            .await
            .map_err(|_| SourceError::ChannelClosed {
                name: self.name.clone(),
            })?;
        self.metrics.event_emitted();
        Ok(())
    }
}

#[async_trait]
impl Source for RandomSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> &'static str {
        crate::source::RANDOM_TYPE
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
        let snapshot = self.metrics.snapshot();
        let mut meta = HashMap::new();
        meta.insert(
            "events_emitted".to_string(),
            snapshot.events_emitted.to_string(),
        );
        meta.insert(
            "interval_ms".to_string(),
            self.conf.interval.as_millis().to_string(),
        );
        meta
    }

    fn schema(&self) -> SchemaMap {
        SchemaMap::new()
    }

    fn available_actions(&self) -> HashMap<String, ActionDescriptor> {
        let mut actions = lifecycle_actions();
        actions.insert(
            "emit".to_string(),
            ActionDescriptor::new("emit a single event immediately"),
        );
        actions
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

        let mut run = self.run.lock().await;
        if let Some(handle) = run.as_ref() {
            if !handle.task.is_finished() {
                tracing::debug!(source = %self.name, "start on running source, nothing to do");
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(generator(
            self.name.clone(),
            self.environment.clone(),
            self.conf.clone(),
            self.events.clone(),
            Arc::clone(&self.status),
            Arc::clone(&self.metrics),
            Arc::clone(&self.sequence),
            cancel.clone(),
        ));

        *run = Some(RunHandle { cancel, task });
        *self.status.write() = SourceStatus::Running;
        tracing::info!(
            source = %self.name,
            interval_ms = self.conf.interval.as_millis() as u64,
            "random source started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        let mut run = self.run.lock().await;
        if let Some(handle) = run.take() {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                tracing::warn!(source = %self.name, error = %e, "generator task panicked");
            }
        }
        *self.status.write() = SourceStatus::Stopped;
        tracing::info!(source = %self.name, "random source stopped");
        Ok(())
    }

    async fn process(&self, action: &str, _payload: &[u8]) -> Result<(), SourceError> {
        match action {
            "emit" => self.emit_once().await,
            other => {
                tracing::debug!(source = %self.name, action = %other, "ignoring unknown action");
                Ok(())
            }
        }
    }
}

/// The generator task: one event per tick until cancelled.
#[allow(clippy::too_many_arguments)]
async fn generator(
    name: String,
    environment: String,
    conf: RandomSourceConfig,
    events: mpsc::Sender<Event>,
    status: Arc<RwLock<SourceStatus>>,
    metrics: Arc<SourceMetrics>,
    sequence: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(conf.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick fires immediately; skip it so start() returns before
    // the first event lands on the bus
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                let event = RandomSource::make_event(&environment, seq, conf.payload_bytes);
                if events.send(event).await.is_err() {
                    // bus closed under us: only happens at shutdown
                    tracing::debug!(source = %name, "event bus closed, generator exiting");
                    *status.write() = SourceStatus::Stopped;
                    return;
                }
                metrics.event_emitted();
            }
            _ = cancel.cancelled() => {
                tracing::debug!(source = %name, "generator cancelled");
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "random_test.rs"]
mod random_test;
