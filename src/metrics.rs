//! Metrics facade: what gets incremented, not how it's exported. Wraps the
//! `metrics` crate's `counter!`/`gauge!`/`histogram!` macros with the label
//! set spec.md §6 names. Registering a
//! concrete exporter (Prometheus, OTel) is explicitly out of scope — an
//! external collaborator wires a recorder via `metrics::set_global_recorder`
//! before constructing this, or none at all, in which case the macros are
//! harmless no-ops.

use crate::types::{EventType, Severity};

/// Thin, dependency-injected wrapper — never a `static`. Constructed once
/// per [`crate::Registry`] and cloned into every subsystem that reports.
pub struct MetricsRegistry;

impl MetricsRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn event_emitted(&self, event_type: EventType, severity: Severity, container_name: &str) {
        metrics::counter!(
            "monitor_events_total",
            "event_type" => event_type.to_string(),
            "severity" => severity.to_string(),
            "container_name" => container_name.to_string(),
        )
        .increment(1);
    }

    pub fn queue_full(&self) {
        metrics::counter!("monitor_queue_full_total").increment(1);
    }

    pub fn alert_sent(&self, delivery_method: &str) {
        metrics::counter!("monitor_alerts_sent_total", "delivery_method" => delivery_method.to_string())
            .increment(1);
    }

    pub fn alert_failed(&self, delivery_method: &str) {
        metrics::counter!("monitor_alerts_failed_total", "delivery_method" => delivery_method.to_string())
            .increment(1);
    }

    pub fn alert_rate_limited(&self) {
        metrics::counter!("monitor_alerts_rate_limited_total").increment(1);
    }

    pub fn scan_duration(&self, seconds: f64) {
        metrics::histogram!("monitor_scan_duration_seconds").record(seconds);
    }

    pub fn containers_monitored(&self, count: u64) {
        metrics::gauge!("monitor_containers_monitored").set(count as f64);
    }

    pub fn executor_running(&self, count: u64) {
        metrics::gauge!("monitor_executor_running").set(count as f64);
    }

    pub fn retention_buffer_size(&self, count: u64) {
        metrics::gauge!("monitor_retention_buffer_size").set(count as f64);
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
