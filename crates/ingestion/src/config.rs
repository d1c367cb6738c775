//! Stream source configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use contracts::StreamConfig;

/// SSE source configuration
#[derive(Debug, Clone)]
pub struct SseSourceConfig {
    /// Delay before reconnecting, unless overridden by the server's `retry:`
    pub reconnect_delay: Duration,

    /// Buffered signals per open stream
    pub channel_capacity: usize,

    /// Bearer token attached to requests opened `with_credentials`
    pub access_token: Option<String>,
}

impl Default for SseSourceConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(3000),
            channel_capacity: 256,
            access_token: None,
        }
    }
}

impl SseSourceConfig {
    pub fn from_stream_config(config: &StreamConfig, access_token: Option<String>) -> Self {
        Self {
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            channel_capacity: config.channel_capacity,
            access_token,
        }
    }
}

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Streams opened by callers
    pub streams_opened: AtomicU64,

    /// Streams currently open
    pub streams_active: AtomicUsize,

    /// Connection attempts after the first
    pub reconnects: AtomicU64,

    /// Named events delivered
    pub events_received: AtomicU64,

    /// Error signals surfaced
    pub errors: AtomicU64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        self.streams_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.streams_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_active: self.streams_active.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub streams_opened: u64,
    pub streams_active: usize,
    pub reconnects: u64,
    pub events_received: u64,
    pub errors: u64,
}
