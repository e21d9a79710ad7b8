//! Thread-safe metrics collection
//!
//! Atomic counters for the device links, the classifier and the client
//! broadcaster, exposed as a JSON snapshot at `GET /metrics`.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
#[derive(Debug)]
pub struct MetricsCollector {
    // Device links
    links_opened: AtomicU64,
    links_superseded: AtomicU64,
    active_links: AtomicU64,
    connect_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    commands_published: AtomicU64,
    publish_failures: AtomicU64,

    // Classifier
    reports_received: AtomicU64,
    reports_malformed: AtomicU64,
    events_classified: AtomicU64,

    // Broadcaster
    connected_clients: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    deliveries_dropped: AtomicU64,

    uptime_start: AtomicU64,
}

/// Serializable point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub links: LinkMetrics,
    pub classifier: ClassifierMetrics,
    pub clients: ClientMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkMetrics {
    pub opened: u64,
    pub superseded: u64,
    pub active: u64,
    pub connect_failures: u64,
    pub reconnect_attempts: u64,
    pub commands_published: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierMetrics {
    pub reports_received: u64,
    pub reports_malformed: u64,
    pub events_classified: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMetrics {
    pub connected: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub deliveries_dropped: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            links_opened: AtomicU64::new(0),
            links_superseded: AtomicU64::new(0),
            active_links: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            commands_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            reports_received: AtomicU64::new(0),
            reports_malformed: AtomicU64::new(0),
            events_classified: AtomicU64::new(0),
            connected_clients: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Device link metrics
    pub fn link_opened(&self) {
        self.links_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_superseded(&self) {
        self.links_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_links(&self, count: usize) {
        self.active_links.store(count as u64, Ordering::Relaxed);
    }

    pub fn connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_published(&self) {
        self.commands_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Classifier metrics
    pub fn report_received(&self) {
        self.reports_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_malformed(&self) {
        self.reports_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_classified(&self, count: usize) {
        self.events_classified
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    // Broadcaster metrics
    pub fn client_connected(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        // Saturating: a reset between connect and disconnect must not wrap
        let _ = self
            .connected_clients
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn broadcast_sent(&self, delivered: usize, dropped: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.deliveries_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.links_opened,
            &self.links_superseded,
            &self.active_links,
            &self.connect_failures,
            &self.reconnect_attempts,
            &self.commands_published,
            &self.publish_failures,
            &self.reports_received,
            &self.reports_malformed,
            &self.events_classified,
            &self.connected_clients,
            &self.broadcasts,
            &self.deliveries,
            &self.deliveries_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        MetricsSnapshot {
            links: LinkMetrics {
                opened: load(&self.links_opened),
                superseded: load(&self.links_superseded),
                active: load(&self.active_links),
                connect_failures: load(&self.connect_failures),
                reconnect_attempts: load(&self.reconnect_attempts),
                commands_published: load(&self.commands_published),
                publish_failures: load(&self.publish_failures),
            },
            classifier: ClassifierMetrics {
                reports_received: load(&self.reports_received),
                reports_malformed: load(&self.reports_malformed),
                events_classified: load(&self.events_classified),
            },
            clients: ClientMetrics {
                connected: load(&self.connected_clients),
                broadcasts: load(&self.broadcasts),
                deliveries: load(&self.deliveries),
                deliveries_dropped: load(&self.deliveries_dropped),
            },
            uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Seconds since the Unix epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
