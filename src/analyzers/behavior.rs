//! Resource and process behavior analysis.
//!
//! Grounded on `original_source/.../analyzers/behavior.py`: the CPU%/memory%
//! formulas, the 2.0x CPU-anomaly and 1.5x memory-anomaly multipliers
//! against the rolling baseline average, and the 5-vs-5 CPU trend
//! comparison — generalized here with the HIGH-escalation thresholds and
//! the container-kind-aware heuristic process list.

use std::sync::Arc;

use crate::baseline::BaselineStore;
use crate::config::MonitorConfig;
use crate::types::{EventType, ProcessList, SecurityEvent, Severity, StatsSnapshot};

const CPU_ANOMALY_MULTIPLIER: f64 = 2.0;
const MEMORY_ANOMALY_MULTIPLIER: f64 = 1.5;
const CPU_TREND_INCREASE_RATIO: f64 = 1.2;
const CPU_TREND_DECREASE_RATIO: f64 = 0.8;
const HIGH_ESCALATION_PERCENT: f64 = 95.0;
const PROCESS_COUNT_MULTIPLIER: f64 = 2.0;
const SUSTAINED_CPU_THRESHOLD: f64 = 70.0;
const SUSTAINED_CPU_WINDOW: usize = 10;
const SUSTAINED_CPU_MIN_HITS: usize = 8;

const HEURISTIC_PATTERNS: &[&str] = &["wget", "curl", "ssh", "scp", "rsync", "nmap", "masscan"];

/// Container-name keyword → command substrings expected for that kind.
const EXPECTED_COMMANDS: &[(&str, &[&str])] = &[
    ("web", &["nginx", "apache", "node", "python", "gunicorn"]),
    ("db", &["mysql", "postgres", "redis", "mongo"]),
    ("cache", &["redis", "memcached"]),
    ("proxy", &["nginx", "haproxy", "envoy"]),
];

pub struct BehaviorAnalyzer {
    config: Arc<MonitorConfig>,
    baselines: Arc<BaselineStore>,
}

impl BehaviorAnalyzer {
    pub fn new(config: Arc<MonitorConfig>, baselines: Arc<BaselineStore>) -> Self {
        Self { config, baselines }
    }

    /// Computes CPU/memory percentages from `stats`, checks them and the
    /// baseline deviation, then updates the rolling ring buffers.
    pub fn analyze_stats(
        &self,
        container_id: &str,
        container_name: &str,
        stats: &StatsSnapshot,
    ) -> Vec<SecurityEvent> {
        let mut events = Vec::new();
        let cpu_percent = cpu_percent(stats);
        let memory_percent = memory_percent(stats);

        self.baselines.with_baseline(container_id, container_name, |baseline| {
            let cpu_avg_before = baseline.cpu_history.average();
            let mem_avg_before = baseline.memory_history.average();
            let sustained_hits_before = baseline
                .cpu_history
                .count_recent_exceeding(SUSTAINED_CPU_WINDOW, SUSTAINED_CPU_THRESHOLD);

            if cpu_percent > self.config.cpu_threshold {
                let severity = if cpu_percent >= HIGH_ESCALATION_PERCENT {
                    Severity::High
                } else {
                    Severity::Medium
                };
                events.push(
                    SecurityEvent::new(
                        EventType::ResourceAnomaly,
                        severity,
                        "behavior_analyzer",
                        format!(
                            "CPU usage {cpu_percent:.1}% exceeds threshold {:.1}%",
                            self.config.cpu_threshold
                        ),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("cpu_percent", cpu_percent)
                    .with_detail("threshold", self.config.cpu_threshold),
                );
            }

            if memory_percent > self.config.memory_threshold {
                let severity = if memory_percent >= HIGH_ESCALATION_PERCENT {
                    Severity::High
                } else {
                    Severity::Medium
                };
                events.push(
                    SecurityEvent::new(
                        EventType::ResourceAnomaly,
                        severity,
                        "behavior_analyzer",
                        format!(
                            "Memory usage {memory_percent:.1}% exceeds threshold {:.1}%",
                            self.config.memory_threshold
                        ),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("memory_percent", memory_percent)
                    .with_detail("threshold", self.config.memory_threshold),
                );
            }

            if let Some(avg) = cpu_avg_before {
                if cpu_percent > avg * CPU_ANOMALY_MULTIPLIER {
                    baseline.record_anomaly();
                    let trend = baseline
                        .cpu_history
                        .trend(CPU_TREND_INCREASE_RATIO, CPU_TREND_DECREASE_RATIO);
                    events.push(
                        SecurityEvent::new(
                            EventType::BehavioralAnomaly,
                            Severity::Medium,
                            "behavior_analyzer",
                            format!(
                                "CPU usage {cpu_percent:.1}% is {CPU_ANOMALY_MULTIPLIER}x baseline average {avg:.1}%"
                            ),
                        )
                        .with_container(container_id, container_name)
                        .with_detail("baseline_average", avg)
                        .with_detail("observed", cpu_percent)
                        .with_detail("trend", trend.to_string()),
                    );
                }
            }

            if let Some(avg) = mem_avg_before {
                if memory_percent > avg * MEMORY_ANOMALY_MULTIPLIER {
                    baseline.record_anomaly();
                    events.push(
                        SecurityEvent::new(
                            EventType::BehavioralAnomaly,
                            Severity::Medium,
                            "behavior_analyzer",
                            format!(
                                "Memory usage {memory_percent:.1}% is {MEMORY_ANOMALY_MULTIPLIER}x baseline average {avg:.1}%"
                            ),
                        )
                        .with_container(container_id, container_name)
                        .with_detail("baseline_average", avg)
                        .with_detail("observed", memory_percent),
                    );
                }
            }

            if sustained_hits_before >= SUSTAINED_CPU_MIN_HITS {
                events.push(
                    SecurityEvent::new(
                        EventType::BehavioralAnomaly,
                        Severity::Medium,
                        "behavior_analyzer",
                        format!(
                            "CPU usage exceeded {SUSTAINED_CPU_THRESHOLD:.0}% in {sustained_hits_before}/{SUSTAINED_CPU_WINDOW} recent samples"
                        ),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("hits", sustained_hits_before as u64),
                );
            }

            baseline.cpu_history.push(cpu_percent);
            baseline.memory_history.push(memory_percent);
        });

        events
    }

    /// Flags blocked process names and heuristic-pattern commands not
    /// "expected" for the container's kind.
    pub fn analyze_processes(
        &self,
        container_id: &str,
        container_name: &str,
        processes: &ProcessList,
    ) -> Vec<SecurityEvent> {
        let mut events = Vec::new();

        let process_count_before = self
            .baselines
            .with_baseline(container_id, container_name, |baseline| baseline.process_history.average());

        if let Some(avg) = process_count_before {
            if processes.len() as f64 > avg * PROCESS_COUNT_MULTIPLIER {
                events.push(
                    SecurityEvent::new(
                        EventType::BehavioralAnomaly,
                        Severity::Medium,
                        "behavior_analyzer",
                        format!("Process count {} exceeds {PROCESS_COUNT_MULTIPLIER}x baseline average {avg:.1}", processes.len()),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("process_count", processes.len() as u64)
                    .with_detail("baseline_average", avg),
                );
            }
        }

        self.baselines.with_baseline(container_id, container_name, |baseline| {
            baseline.process_history.push(processes.len() as f64);
        });

        let expected_substrings = expected_commands_for(container_name);

        for process in processes {
            let command_lower = process.command.to_lowercase();

            let blocked = self
                .config
                .blocked_processes
                .iter()
                .any(|blocked| command_lower.contains(&blocked.to_lowercase()));
            if blocked {
                events.push(
                    SecurityEvent::new(
                        EventType::SuspiciousProcess,
                        Severity::High,
                        "behavior_analyzer",
                        format!("Blocked process detected: {}", process.command),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("pid", process.pid)
                    .with_detail("command", process.command.clone()),
                );
                continue;
            }

            let matches_heuristic = HEURISTIC_PATTERNS.iter().any(|p| command_lower.contains(p));
            let is_expected = expected_substrings.iter().any(|s| command_lower.contains(s));
            if matches_heuristic && !is_expected {
                events.push(
                    SecurityEvent::new(
                        EventType::SuspiciousProcess,
                        Severity::Medium,
                        "behavior_analyzer",
                        format!("Unexpected network tool invocation: {}", process.command),
                    )
                    .with_container(container_id, container_name)
                    .with_detail("pid", process.pid)
                    .with_detail("command", process.command.clone()),
                );
            }
        }

        events
    }
}

fn expected_commands_for(container_name: &str) -> Vec<&'static str> {
    let name_lower = container_name.to_lowercase();
    EXPECTED_COMMANDS
        .iter()
        .filter(|(keyword, _)| name_lower.contains(keyword))
        .flat_map(|(_, commands)| commands.iter().copied())
        .collect()
}

/// `(Δtotal / Δsystem) × n_cpus × 100` when both deltas are positive; else 0.
fn cpu_percent(stats: &StatsSnapshot) -> f64 {
    let cpu_delta = stats.cpu.total_usage.saturating_sub(stats.cpu.total_usage_prev) as f64;
    let system_delta = stats.cpu.system_usage.saturating_sub(stats.cpu.system_usage_prev) as f64;
    if system_delta <= 0.0 || cpu_delta <= 0.0 {
        return 0.0;
    }
    (cpu_delta / system_delta) * stats.cpu.online_cpus.max(1) as f64 * 100.0
}

fn memory_percent(stats: &StatsSnapshot) -> f64 {
    if stats.memory.limit == 0 {
        return 0.0;
    }
    (stats.memory.usage as f64 / stats.memory.limit as f64) * 100.0
}

impl crate::analyzers::Analyzer for BehaviorAnalyzer {
    fn analyze(&self, ctx: &crate::analyzers::AnalysisContext) -> Vec<SecurityEvent> {
        let mut events = Vec::new();
        if let Some(stats) = &ctx.stats {
            events.extend(self.analyze_stats(&ctx.container_id, &ctx.container_name, stats));
        }
        if let Some(processes) = &ctx.processes {
            events.extend(self.analyze_processes(&ctx.container_id, &ctx.container_name, processes));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CpuStats, MemoryStats, ProcessEntry};

    fn stats_with(cpu_delta: u64, mem_usage: u64) -> StatsSnapshot {
        StatsSnapshot {
            cpu: CpuStats {
                total_usage: 100 + cpu_delta,
                total_usage_prev: 100,
                system_usage: 200,
                system_usage_prev: 100,
                online_cpus: 1,
            },
            memory: MemoryStats {
                usage: mem_usage,
                limit: 1000,
            },
            networks: Default::default(),
        }
    }

    #[test]
    fn cpu_over_threshold_emits_medium_resource_anomaly() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = BehaviorAnalyzer::new(Arc::new(config), Arc::new(baselines));
        // delta ratio 90/100 * 100 = 90% > 80 threshold but < 95 escalation.
        let stats = stats_with(90, 100);
        let events = analyzer.analyze_stats("c1", "web", &stats);
        let anomaly = events.iter().find(|e| e.event_type == EventType::ResourceAnomaly).unwrap();
        assert_eq!(anomaly.severity, Severity::Medium);
    }

    #[test]
    fn cpu_above_95_escalates_to_high() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = BehaviorAnalyzer::new(Arc::new(config), Arc::new(baselines));
        let stats = stats_with(99, 100);
        let events = analyzer.analyze_stats("c1", "web", &stats);
        let anomaly = events.iter().find(|e| e.event_type == EventType::ResourceAnomaly).unwrap();
        assert_eq!(anomaly.severity, Severity::High);
    }

    #[test]
    fn blocked_process_flagged_high() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = BehaviorAnalyzer::new(Arc::new(config), Arc::new(baselines));
        let processes = vec![ProcessEntry {
            pid: 42,
            command: "/usr/bin/nc -l -p 4444".to_string(),
        }];
        let events = analyzer.analyze_processes("c1", "web", &processes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::High);
    }

    #[test]
    fn heuristic_tool_allowed_for_expected_container_kind() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = BehaviorAnalyzer::new(Arc::new(config), Arc::new(baselines));
        let processes = vec![ProcessEntry {
            pid: 1,
            command: "nginx -g daemon off;".to_string(),
        }];
        let events = analyzer.analyze_processes("c1", "web-frontend", &processes);
        assert!(events.is_empty());
    }

    #[test]
    fn heuristic_tool_flagged_for_unexpected_container_kind() {
        let config = MonitorConfig::default();
        let baselines = BaselineStore::new();
        let analyzer = BehaviorAnalyzer::new(Arc::new(config), Arc::new(baselines));
        let processes = vec![ProcessEntry {
            pid: 2,
            command: "nmap -sS 10.0.0.0/24".to_string(),
        }];
        let events = analyzer.analyze_processes("c1", "web-frontend", &processes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Medium);
    }
}
