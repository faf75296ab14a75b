//! Common types and utilities for sources

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics shared by all source types
#[derive(Debug, Default)]
pub struct SourceMetrics {
    /// Total events emitted onto the bus
    pub events_emitted: AtomicU64,

    /// Total errors encountered
    pub errors: AtomicU64,
}

impl SourceMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            events_emitted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Record an emitted event
    #[inline]
    pub fn event_emitted(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    #[inline]
    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of source metrics
#[derive(Debug, Clone, Copy)]
pub struct SourceMetricsSnapshot {
    pub events_emitted: u64,
    pub errors: u64,
}
