//! Metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;

/// Operational counters
///
/// Relaxed ordering throughout; counters are read for reporting only.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    channels_opened: AtomicU64,
    channel_failures: AtomicU64,
    circuit_rejections: AtomicU64,
    deliveries: AtomicU64,
    events_superseded: AtomicU64,
    deliveries_cancelled: AtomicU64,
    assistant_requests: AtomicU64,
    assistant_rejections: AtomicU64,
    webhooks_processed: AtomicU64,
    webhooks_failed: AtomicU64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub channels_opened: u64,
    pub channel_failures: u64,
    pub circuit_rejections: u64,
    pub deliveries: u64,
    pub events_superseded: u64,
    pub deliveries_cancelled: u64,
    pub assistant_requests: u64,
    pub assistant_rejections: u64,
    pub webhooks_processed: u64,
    pub webhooks_failed: u64,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<MetricsRegistry> {
        static GLOBAL: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(MetricsRegistry::new())).clone()
    }

    // Realtime

    pub fn increment_channels_opened(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_channel_failures(&self) {
        self.channel_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_circuit_rejections(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deliveries(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_superseded(&self) {
        self.events_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_deliveries_cancelled(&self, count: u64) {
        self.deliveries_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    // Functions

    pub fn increment_assistant_requests(&self) {
        self.assistant_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_assistant_rejections(&self) {
        self.assistant_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_webhooks_processed(&self) {
        self.webhooks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_webhooks_failed(&self) {
        self.webhooks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            channel_failures: self.channel_failures.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            events_superseded: self.events_superseded.load(Ordering::Relaxed),
            deliveries_cancelled: self.deliveries_cancelled.load(Ordering::Relaxed),
            assistant_requests: self.assistant_requests.load(Ordering::Relaxed),
            assistant_rejections: self.assistant_rejections.load(Ordering::Relaxed),
            webhooks_processed: self.webhooks_processed.load(Ordering::Relaxed),
            webhooks_failed: self.webhooks_failed.load(Ordering::Relaxed),
        }
    }

    /// Render the snapshot as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_else(|_| serde_json::json!({}))
    }
}
