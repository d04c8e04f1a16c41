//! Core data model: events, severities, and the container-runtime data
//! shapes the analyzers operate on.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels, totally ordered `CRITICAL > HIGH > MEDIUM > LOW > INFO`.
/// `Ord` is derived in declaration order, so `Severity::Critical < Severity::Info`
/// numerically — callers that want "most severe first" should sort ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Weight used by report risk scoring (§4.9).
    pub fn weight(self) -> u32 {
        match self {
            Severity::Critical => 10,
            Severity::High => 7,
            Severity::Medium => 4,
            Severity::Low => 2,
            Severity::Info => 1,
        }
    }

    /// `true` for CRITICAL/HIGH — the alert-worthy severities.
    pub fn is_alert_worthy(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        };
        write!(f, "{s}")
    }
}

/// The closed set of event types analyzers may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FileSystemChange,
    ResourceAnomaly,
    SuspiciousProcess,
    NetworkAnomaly,
    SecurityMisconfiguration,
    NetworkSecurity,
    BehavioralAnomaly,
    AnalysisError,
    PostureCheckError,
    NetworkAnalysisError,
    SecurityRecommendation,
    NetworkScanning,
    DataExfiltration,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::FileSystemChange => "file_system_change",
            EventType::ResourceAnomaly => "resource_anomaly",
            EventType::SuspiciousProcess => "suspicious_process",
            EventType::NetworkAnomaly => "network_anomaly",
            EventType::SecurityMisconfiguration => "security_misconfiguration",
            EventType::NetworkSecurity => "network_security",
            EventType::BehavioralAnomaly => "behavioral_anomaly",
            EventType::AnalysisError => "analysis_error",
            EventType::PostureCheckError => "posture_check_error",
            EventType::NetworkAnalysisError => "network_analysis_error",
            EventType::SecurityRecommendation => "security_recommendation",
            EventType::NetworkScanning => "network_scanning",
            EventType::DataExfiltration => "data_exfiltration",
        };
        write!(f, "{s}")
    }
}

/// Immutable record produced by an analyzer and handed once to the pipeline.
///
/// Invariant: `every event of type SecurityMisconfiguration has a non-empty
/// container_id` — enforced by [`SecurityEvent::new`] panicking in debug
/// builds would be too strict for a monitoring path, so it is instead
/// asserted in analyzer unit tests and documented here rather than checked
/// at runtime (a malformed posture event is a programming bug, not input
/// the monitor must tolerate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub source: String,
    pub container_id: String,
    pub container_name: String,
    pub description: String,
    pub details: HashMap<String, serde_json::Value>,
    pub remediation: Option<String>,
}

impl SecurityEvent {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            severity,
            source: source.into(),
            container_id: String::new(),
            container_name: String::new(),
            description: description.into(),
            details: HashMap::new(),
            remediation: None,
        }
    }

    pub fn with_container(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.container_id = id.into();
        self.container_name = name.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_remediation(mut self, text: impl Into<String>) -> Self {
        self.remediation = Some(text.into());
        self
    }
}

/// Container name + id as returned by a `List` call, before any pattern
/// filtering or detail inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// CPU stats snapshot shape, mirroring Docker's `cpu_stats`/`precpu_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuStats {
    pub total_usage: u64,
    pub total_usage_prev: u64,
    pub system_usage: u64,
    pub system_usage_prev: u64,
    pub online_cpus: u32,
}

/// Memory stats shape, mirroring Docker's `memory_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub usage: u64,
    pub limit: u64,
}

/// Per-interface network counters, mirroring Docker's
/// `networks.<iface>.{rx_bytes,tx_bytes,...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterfaceStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

/// Point-in-time stats snapshot for one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub networks: HashMap<String, NetworkInterfaceStats>,
}

/// A single process entry as reported by `Processes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command: String,
}

/// The full process table for one container.
pub type ProcessList = Vec<ProcessEntry>;

/// A single mount point as reported by `Inspect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountPoint {
    pub source: String,
    pub destination: String,
    pub mode: String,
    pub writable: bool,
    pub mount_type: String,
}

/// A single published port binding as reported by `Inspect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
}

/// Full container configuration as returned by `Inspect`, mirroring the
/// Docker-engine-style `Config`/`HostConfig`/`Mounts`/`NetworkSettings` shape
/// named in spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    pub image: String,
    pub user: String,
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub network_mode: String,
    pub exposed_ports: Vec<PortBinding>,
    pub security_opt: Vec<String>,
    pub memory_limit: u64,
    pub pids_limit: i64,
    pub mounts: Vec<MountPoint>,
}

/// The closed set of sensitive host directories (Glossary).
pub const SENSITIVE_DIRECTORIES: &[&str] = &[
    "/proc",
    "/sys",
    "/etc",
    "/boot",
    "/dev",
    "/lib/modules",
    "/usr/lib/modules",
    "/var/run/docker.sock",
    "/var/lib/docker",
];

/// The closed set of dangerous capabilities (Glossary).
pub const DANGEROUS_CAPABILITIES: &[&str] = &[
    "SYS_ADMIN",
    "SYS_MODULE",
    "SYS_TIME",
    "SYS_BOOT",
    "SYS_PTRACE",
    "DAC_OVERRIDE",
    "NET_ADMIN",
    "NET_RAW",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_is_critical_first() {
        let mut levels = vec![Severity::Info, Severity::Critical, Severity::Medium];
        levels.sort();
        assert_eq!(levels, vec![Severity::Critical, Severity::Medium, Severity::Info]);
    }

    #[test]
    fn alert_worthy_is_exactly_critical_and_high() {
        assert!(Severity::Critical.is_alert_worthy());
        assert!(Severity::High.is_alert_worthy());
        assert!(!Severity::Medium.is_alert_worthy());
        assert!(!Severity::Low.is_alert_worthy());
        assert!(!Severity::Info.is_alert_worthy());
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = SecurityEvent::new(
            EventType::SecurityMisconfiguration,
            Severity::High,
            "posture_checker",
            "container running as root",
        )
        .with_container("abc123", "web-1")
        .with_detail("user", "root");

        let json = serde_json::to_string(&event).unwrap();
        let back: SecurityEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, event.event_type);
        assert_eq!(back.severity, event.severity);
        assert_eq!(back.container_id, event.container_id);
        assert_eq!(back.details, event.details);
    }
}
