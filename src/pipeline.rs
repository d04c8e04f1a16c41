//! Bounded event intake with a retention buffer and fan-out to reporting
//! and alerting (spec.md §4.7).
//!
//! `tokio::sync::mpsc` with `try_send` gives the required non-blocking
//! `Offer` semantics directly, matching the channel-based forwarding
//! pattern used for every other cross-task handoff in this crate.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::alert::AlertSender;
use crate::metrics::MetricsRegistry;
use crate::report::ReportAggregator;
use crate::types::SecurityEvent;

const QUEUE_CAPACITY: usize = 1_000;
const RETENTION_CAPACITY: usize = 10_000;

/// Non-blocking bounded sink. `offer` never awaits; on a full queue it
/// records `queue_full` and drops the event.
pub struct EventPipeline {
    sender: mpsc::Sender<SecurityEvent>,
    retention: Arc<Mutex<VecDeque<SecurityEvent>>>,
    metrics: Arc<MetricsRegistry>,
}

impl EventPipeline {
    pub fn new(metrics: Arc<MetricsRegistry>) -> (Arc<Self>, mpsc::Receiver<SecurityEvent>) {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let pipeline = Arc::new(Self {
            sender,
            retention: Arc::new(Mutex::new(VecDeque::with_capacity(RETENTION_CAPACITY))),
            metrics,
        });
        (pipeline, receiver)
    }

    /// Offers `event` to the pipeline. Returns `true` if accepted.
    pub fn offer(&self, event: SecurityEvent) -> bool {
        self.metrics.event_emitted(event.event_type, event.severity, &event.container_name);
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.metrics.queue_full();
                false
            }
        }
    }

    pub fn retention_snapshot(&self) -> Vec<SecurityEvent> {
        self.retention.lock().iter().cloned().collect()
    }

    pub fn retention_len(&self) -> usize {
        self.retention.lock().len()
    }

    /// Appends to the bounded FIFO retention buffer, evicting the oldest
    /// entry when full.
    fn retain(&self, event: &SecurityEvent) {
        let mut buffer = self.retention.lock();
        if buffer.len() >= RETENTION_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
    }
}

/// The drain loop: runs independently of producers, routing every
/// accepted event to retention, the report aggregator, and (for
/// CRITICAL/HIGH severities) the alert sender.
pub async fn drain_loop(
    pipeline: Arc<EventPipeline>,
    mut receiver: mpsc::Receiver<SecurityEvent>,
    aggregator: Arc<ReportAggregator>,
    alert_sender: Arc<AlertSender>,
) {
    while let Some(event) = receiver.recv().await {
        pipeline.retain(&event);
        aggregator.record(event.clone());
        if event.severity.is_alert_worthy() {
            let sender = alert_sender.clone();
            let event_for_alert = event.clone();
            tokio::spawn(async move {
                sender.send(event_for_alert).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertSender;
    use crate::config::MonitorConfig;
    use crate::error_handling::ErrorHandler;
    use crate::report::ReportAggregator;
    use crate::types::{EventType, Severity};

    fn test_event(severity: Severity) -> SecurityEvent {
        SecurityEvent::new(EventType::ResourceAnomaly, severity, "test", "test event")
    }

    #[test]
    fn offer_accepts_until_capacity() {
        let metrics = Arc::new(MetricsRegistry::new());
        let (pipeline, _receiver) = EventPipeline::new(metrics);
        for _ in 0..QUEUE_CAPACITY {
            assert!(pipeline.offer(test_event(Severity::Info)));
        }
        assert!(!pipeline.offer(test_event(Severity::Info)));
    }

    #[tokio::test]
    async fn drain_loop_populates_retention_and_report() {
        let metrics = Arc::new(MetricsRegistry::new());
        let (pipeline, receiver) = EventPipeline::new(metrics.clone());
        let aggregator = Arc::new(ReportAggregator::new());
        let config = MonitorConfig::default();
        let errors = Arc::new(ErrorHandler::new());
        let alert_sender = Arc::new(AlertSender::new(config, errors, metrics));

        let handle = tokio::spawn(drain_loop(pipeline.clone(), receiver, aggregator.clone(), alert_sender));

        pipeline.offer(test_event(Severity::Critical));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(aggregator.snapshot().len(), 1);
    }
}
