//! Metrics Collector

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::Result;

/// Collects and exports relay metrics.
///
/// All counters here are diagnostic: the relay's observable behavior never
/// depends on them. The Prometheus registry carries the exportable view; a
/// parallel set of atomics backs the plain accessors used in logs and tests.
pub struct Metrics {
    prometheus_registry: Registry,

    // Prometheus metrics
    connections_total: IntCounter,
    active_connections: IntGauge,
    messages_received_total: IntCounter,
    forwards_total: IntCounter,
    send_failures_total: IntCounter,

    // Internal counters
    total_connections: AtomicU64,
    total_messages: AtomicU64,
    total_forwards: AtomicU64,
    total_send_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        let connections_total = IntCounter::new(
            "wsrelay_connections_total",
            "Total number of accepted WebSocket connections",
        )
        .expect("Failed to create connections_total counter");

        let active_connections = IntGauge::new(
            "wsrelay_active_connections",
            "Number of currently open WebSocket connections",
        )
        .expect("Failed to create active_connections gauge");

        let messages_received_total = IntCounter::new(
            "wsrelay_messages_received_total",
            "Total messages received from source-group connections",
        )
        .expect("Failed to create messages_received_total counter");

        let forwards_total = IntCounter::new(
            "wsrelay_forwards_total",
            "Total successful message forwards to target-group connections",
        )
        .expect("Failed to create forwards_total counter");

        let send_failures_total = IntCounter::new(
            "wsrelay_send_failures_total",
            "Total forwards skipped because the target was no longer writable",
        )
        .expect("Failed to create send_failures_total counter");

        prometheus_registry
            .register(Box::new(connections_total.clone()))
            .expect("Failed to register connections_total");
        prometheus_registry
            .register(Box::new(active_connections.clone()))
            .expect("Failed to register active_connections");
        prometheus_registry
            .register(Box::new(messages_received_total.clone()))
            .expect("Failed to register messages_received_total");
        prometheus_registry
            .register(Box::new(forwards_total.clone()))
            .expect("Failed to register forwards_total");
        prometheus_registry
            .register(Box::new(send_failures_total.clone()))
            .expect("Failed to register send_failures_total");

        Self {
            prometheus_registry,
            connections_total,
            active_connections,
            messages_received_total,
            forwards_total,
            send_failures_total,
            total_connections: AtomicU64::new(0),
            total_messages: AtomicU64::new(0),
            total_forwards: AtomicU64::new(0),
            total_send_failures: AtomicU64::new(0),
        }
    }

    /// Record an accepted connection
    pub fn connection_opened(&self) {
        self.connections_total.inc();
        self.active_connections.inc();
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection
    pub fn connection_closed(&self) {
        self.active_connections.dec();
    }

    /// Record one inbound message from a source-group connection
    pub fn message_received(&self) {
        self.messages_received_total.inc();
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the successful forwards of one fan-out
    pub fn record_forwards(&self, count: u64) {
        self.forwards_total.inc_by(count);
        self.total_forwards.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a forward skipped because the target was not writable
    pub fn send_failure(&self) {
        self.send_failures_total.inc();
        self.total_send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.get()
    }

    pub fn messages_received(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn forwards(&self) -> u64 {
        self.total_forwards.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.total_send_failures.load(Ordering::Relaxed)
    }

    /// Export all metrics in the Prometheus text format
    pub fn export(&self) -> Result<String> {
        let metric_families = self.prometheus_registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output was not valid UTF-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
