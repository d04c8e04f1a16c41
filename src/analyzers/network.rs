//! Traffic-volume, spike, packet-size, error-rate, scanning, and
//! exfiltration detection.
//!
//! Grounded on `original_source/.../analyzers/network.py`'s `NetworkBaseline`
//! (peer-endpoint set, traffic-spike counter) and private-network
//! classifier; rates, thresholds, and the synthetic connection-attempt
//! counter follow the expanded spec exactly (§9 notes the counter is
//! vestigial but preserved literally).

use std::sync::Arc;

use crate::baseline::BaselineStore;
use crate::config::MonitorConfig;
use crate::types::{EventType, SecurityEvent, StatsSnapshot};

const TRAFFIC_SPIKE_MULTIPLIER: f64 = 3.0;
const NETWORK_HIGH_MULTIPLIER: f64 = 2.0;
const MIN_HISTORY_FOR_SPIKE: usize = 5;
const MIN_PACKET_SIZE_BYTES: f64 = 50.0;
const MAX_OUTBOUND_PACKET_SIZE_BYTES: f64 = 1400.0;
const ERROR_RATE_THRESHOLD: f64 = 0.05;
const MIN_PACKETS_FOR_ERROR_CHECK: u64 = 100;
const SCANNING_ATTEMPTS_PER_MINUTE_THRESHOLD: usize = 50;
const EXFIL_TX_MULTIPLIER: f64 = 5.0;
const EXFIL_RECENT_SAMPLE_MULTIPLIER: f64 = 2.0;
const EXFIL_RECENT_SAMPLE_MIN_HITS: usize = 3;
const EXFIL_RATIO_MULTIPLIER: f64 = 10.0;

const PRIVATE_NETWORKS: &[&str] = &["10.", "172.16.", "192.168.", "127."];

/// Tags an address as private/internal for detail attachment; not used to
/// filter any rule.
pub fn is_private_address(addr: &str) -> bool {
    PRIVATE_NETWORKS.iter().any(|prefix| addr.starts_with(prefix))
}

pub struct NetworkAnalyzer {
    config: Arc<MonitorConfig>,
    baselines: Arc<BaselineStore>,
}

impl NetworkAnalyzer {
    pub fn new(config: Arc<MonitorConfig>, baselines: Arc<BaselineStore>) -> Self {
        Self { config, baselines }
    }

    pub fn analyze(
        &self,
        container_id: &str,
        container_name: &str,
        stats: &StatsSnapshot,
        interval_secs: u64,
    ) -> Vec<SecurityEvent> {
        let mut events = Vec::new();
        let interval = interval_secs.max(1) as f64;

        let total_rx_bytes: u64 = stats.networks.values().map(|n| n.rx_bytes).sum();
        let total_tx_bytes: u64 = stats.networks.values().map(|n| n.tx_bytes).sum();
        let total_rx_packets: u64 = stats.networks.values().map(|n| n.rx_packets).sum();
        let total_tx_packets: u64 = stats.networks.values().map(|n| n.tx_packets).sum();
        let total_errors: u64 = stats
            .networks
            .values()
            .map(|n| n.rx_errors + n.tx_errors + n.rx_dropped + n.tx_dropped)
            .sum();

        let rx_rate = total_rx_bytes as f64 / interval;
        let tx_rate = total_tx_bytes as f64 / interval;
        let rx_mbps = mbps(total_rx_bytes, interval);
        let tx_mbps = mbps(total_tx_bytes, interval);

        if rx_mbps > self.config.network_threshold_mbps {
            events.push(self.threshold_event(container_id, container_name, "RX", rx_mbps));
        }
        if tx_mbps > self.config.network_threshold_mbps {
            events.push(self.threshold_event(container_id, container_name, "TX", tx_mbps));
        }

        for (iface, counters) in &stats.networks {
            if counters.rx_packets > 0 {
                let avg_rx_packet_size = counters.rx_bytes as f64 / counters.rx_packets as f64;
                if avg_rx_packet_size < MIN_PACKET_SIZE_BYTES {
                    events.push(
                        SecurityEvent::new(
                            EventType::NetworkAnomaly,
                            crate::types::Severity::Medium,
                            "network_analyzer",
                            format!("Interface {iface} average packet size {avg_rx_packet_size:.0}B suggests covert channel or scanning"),
                        )
                        .with_container(container_id, container_name)
                        .with_detail("interface", iface.clone())
                        .with_detail("avg_packet_size", avg_rx_packet_size),
                    );
                }
            }
            if counters.tx_packets > 0 {
                let avg_tx_packet_size = counters.tx_bytes as f64 / counters.tx_packets as f64;
                if avg_tx_packet_size > MAX_OUTBOUND_PACKET_SIZE_BYTES {
                    events.push(
                        SecurityEvent::new(
                            EventType::NetworkAnomaly,
                            crate::types::Severity::Medium,
                            "network_analyzer",
                            format!("Interface {iface} average outbound packet size {avg_tx_packet_size:.0}B suggests exfiltration"),
                        )
                        .with_container(container_id, container_name)
                        .with_detail("interface", iface.clone())
                        .with_detail("avg_packet_size", avg_tx_packet_size),
                    );
                }
            }
        }

        let total_packets = total_rx_packets + total_tx_packets;
        if total_packets > MIN_PACKETS_FOR_ERROR_CHECK {
            let error_rate = total_errors as f64 / total_packets as f64;
            if error_rate > ERROR_RATE_THRESHOLD {
                events.push(
                    SecurityEvent::new(
                        EventType::NetworkAnomaly,
                        crate::types::Severity::Medium,
                        "network_analyzer",
                        format!("Packet error/drop rate {:.1}% exceeds 5%", error_rate * 100.0),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("error_rate", error_rate)
                    .with_detail("total_packets", total_packets),
                );
            }
        }

        self.baselines.with_baseline(container_id, container_name, |baseline| {
            let rx_avg_before = baseline.rx_history.average();
            let tx_avg_before = baseline.tx_history.average();

            if baseline.rx_history.len() >= MIN_HISTORY_FOR_SPIKE {
                if let Some(avg) = rx_avg_before {
                    if rx_rate > avg * TRAFFIC_SPIKE_MULTIPLIER {
                        baseline.traffic_spike_count += 1;
                        let trend = baseline.rx_history.trend(TRAFFIC_SPIKE_MULTIPLIER, 1.0 / TRAFFIC_SPIKE_MULTIPLIER);
                        events.push(
                            SecurityEvent::new(
                                EventType::NetworkAnomaly,
                                crate::types::Severity::Medium,
                                "network_analyzer",
                                format!("RX rate {rx_rate:.0} B/s is {TRAFFIC_SPIKE_MULTIPLIER}x baseline average {avg:.0} B/s"),
                            )
                            .with_container(container_id, container_name)
                            .with_detail("direction", "rx")
                            .with_detail("trend", trend.to_string()),
                        );
                    }
                }
            }

            if baseline.tx_history.len() >= MIN_HISTORY_FOR_SPIKE {
                if let Some(avg) = tx_avg_before {
                    if tx_rate > avg * TRAFFIC_SPIKE_MULTIPLIER {
                        baseline.traffic_spike_count += 1;
                        events.push(
                            SecurityEvent::new(
                                EventType::NetworkAnomaly,
                                crate::types::Severity::Medium,
                                "network_analyzer",
                                format!("TX rate {tx_rate:.0} B/s is {TRAFFIC_SPIKE_MULTIPLIER}x baseline average {avg:.0} B/s"),
                            )
                            .with_container(container_id, container_name)
                            .with_detail("direction", "tx"),
                        );
                    }

                    if tx_rate > avg * EXFIL_TX_MULTIPLIER {
                        let recent_hits = baseline.tx_history.count_recent_exceeding(5, avg * EXFIL_RECENT_SAMPLE_MULTIPLIER);
                        if recent_hits >= EXFIL_RECENT_SAMPLE_MIN_HITS {
                            events.push(
                                SecurityEvent::new(
                                    EventType::DataExfiltration,
                                    crate::types::Severity::High,
                                    "network_analyzer",
                                    format!("TX rate {tx_rate:.0} B/s is {EXFIL_TX_MULTIPLIER}x baseline with sustained elevation"),
                                )
                                .with_container(container_id, container_name)
                                .with_detail("tx_rate", tx_rate)
                                .with_detail("baseline_average", avg),
                            );
                        }
                    }
                }
            }

            if total_rx_bytes > 0 && total_tx_bytes > total_rx_bytes * EXFIL_RATIO_MULTIPLIER as u64 {
                events.push(
                    SecurityEvent::new(
                        EventType::DataExfiltration,
                        crate::types::Severity::Medium,
                        "network_analyzer",
                        format!("TX bytes {total_tx_bytes} exceed {EXFIL_RATIO_MULTIPLIER}x RX bytes {total_rx_bytes}"),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("tx_bytes", total_tx_bytes)
                    .with_detail("rx_bytes", total_rx_bytes),
                );
            }

            let attempts_last_minute = baseline.record_connection_attempt();
            if attempts_last_minute > SCANNING_ATTEMPTS_PER_MINUTE_THRESHOLD {
                events.push(
                    SecurityEvent::new(
                        EventType::NetworkScanning,
                        crate::types::Severity::High,
                        "network_analyzer",
                        format!("{attempts_last_minute} connection attempts in the last 60s exceeds scanning threshold"),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("attempts_per_minute", attempts_last_minute as u64),
                );
            }

            baseline.rx_history.push(rx_rate);
            baseline.tx_history.push(tx_rate);
        });

        events
    }

    fn threshold_event(&self, container_id: &str, container_name: &str, direction: &str, mbps: f64) -> SecurityEvent {
        let severity = if mbps > self.config.network_threshold_mbps * NETWORK_HIGH_MULTIPLIER {
            crate::types::Severity::High
        } else {
            crate::types::Severity::Medium
        };
        SecurityEvent::new(
            EventType::NetworkAnomaly,
            severity,
            "network_analyzer",
            format!(
                "{direction} traffic {mbps:.2} Mbps exceeds threshold {:.2} Mbps",
                self.config.network_threshold_mbps
            ),
        )
        .with_container(container_id, container_name)
        .with_detail("direction", direction.to_lowercase())
        .with_detail("mbps", mbps)
    }
}

fn mbps(bytes: u64, interval_secs: f64) -> f64 {
    (bytes as f64 * 8.0) / (1024.0 * 1024.0 * interval_secs)
}

impl crate::analyzers::Analyzer for NetworkAnalyzer {
    fn analyze(&self, ctx: &crate::analyzers::AnalysisContext) -> Vec<SecurityEvent> {
        match &ctx.stats {
            Some(stats) => self.analyze(&ctx.container_id, &ctx.container_name, stats, ctx.monitor_interval),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkInterfaceStats;
    use std::collections::HashMap;

    fn stats_with_rx_tx(rx_bytes: u64, tx_bytes: u64) -> StatsSnapshot {
        let mut networks = HashMap::new();
        networks.insert(
            "eth0".to_string(),
            NetworkInterfaceStats {
                rx_bytes,
                tx_bytes,
                rx_packets: rx_bytes / 500 + 1,
                tx_packets: tx_bytes / 500 + 1,
                ..Default::default()
            },
        );
        StatsSnapshot {
            networks,
            ..Default::default()
        }
    }

    #[test]
    fn private_address_classifier() {
        assert!(is_private_address("10.0.0.1"));
        assert!(is_private_address("192.168.1.5"));
        assert!(!is_private_address("8.8.8.8"));
    }

    #[test]
    fn high_volume_triggers_threshold_event() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = NetworkAnalyzer::new(Arc::new(config), Arc::new(baselines));
        let stats = stats_with_rx_tx(200 * 1024 * 1024, 0);
        let events = analyzer.analyze("c1", "web", &stats, 1);
        assert!(events.iter().any(|e| e.event_type == EventType::NetworkAnomaly));
    }

    #[test]
    fn exfiltration_ratio_detected() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = NetworkAnalyzer::new(Arc::new(config), Arc::new(baselines));
        let stats = stats_with_rx_tx(100, 5000);
        let events = analyzer.analyze("c1", "web", &stats, 1);
        assert!(events.iter().any(|e| e.event_type == EventType::DataExfiltration));
    }

    #[test]
    fn scanning_detected_after_51_attempts() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = NetworkAnalyzer::new(Arc::new(config), Arc::new(baselines));
        let stats = stats_with_rx_tx(10, 10);
        let mut last_events = Vec::new();
        for _ in 0..51 {
            last_events = analyzer.analyze("c1", "web", &stats, 1);
        }
        assert!(last_events.iter().any(|e| e.event_type == EventType::NetworkScanning));
    }
}
