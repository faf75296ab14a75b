//! Common types and utilities for sinks

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics shared by all sink types
///
/// The drop counters back the delivery accounting: every event read from a
/// sink's input channel is either delivered in some batch, dropped for
/// oversize, dropped on an encode failure, or dropped during shutdown.
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Events read from the input channel
    pub events_received: AtomicU64,

    /// Records delivered to the transport
    pub records_delivered: AtomicU64,

    /// Bytes delivered to the transport
    pub bytes_delivered: AtomicU64,

    /// Batches published
    pub batches_flushed: AtomicU64,

    /// Events dropped because they exceed the size threshold
    pub oversize_dropped: AtomicU64,

    /// Events dropped because serialization or encryption failed
    pub encode_errors: AtomicU64,

    /// Events dropped while the sink was shutting down
    pub shutdown_dropped: AtomicU64,

    /// Failed-subset retries performed
    pub retries: AtomicU64,
}

impl SinkMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            records_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            oversize_dropped: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            shutdown_dropped: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Record an event read from the input channel
    #[inline]
    pub fn event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a published batch
    #[inline]
    pub fn batch_flushed(&self, record_count: u64, bytes: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.records_delivered.fetch_add(record_count, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record an oversize drop
    #[inline]
    pub fn oversize_drop(&self) {
        self.oversize_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an encode failure drop
    #[inline]
    pub fn encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record events dropped during shutdown
    #[inline]
    pub fn shutdown_drop(&self, count: u64) {
        self.shutdown_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a retry pass over a batch's failed subset
    #[inline]
    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> SinkMetricsSnapshot {
        SinkMetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            oversize_dropped: self.oversize_dropped.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            shutdown_dropped: self.shutdown_dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of sink metrics
#[derive(Debug, Clone, Copy)]
pub struct SinkMetricsSnapshot {
    pub events_received: u64,
    pub records_delivered: u64,
    pub bytes_delivered: u64,
    pub batches_flushed: u64,
    pub oversize_dropped: u64,
    pub encode_errors: u64,
    pub shutdown_dropped: u64,
    pub retries: u64,
}

/// Fatal sink failure reported to the agent.
///
/// Posted when a producer exhausts its retry budget or fails validation;
/// the sink transitions to `OnError`, the agent stays up and forwards the
/// description to the controller.
#[derive(Debug, Clone)]
pub struct SinkFault {
    /// Name of the failing sink instance
    pub sink: String,

    /// Human-readable failure description
    pub error: String,
}
