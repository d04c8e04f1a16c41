//! Time-window report aggregation with a short-TTL cache (spec.md §4.9).
//!
//! Grounded on `original_source/.../core/reporting.py`'s six-section
//! report shape and keyword-based compliance-framework routing; the TTL
//! cache is the same timestamp-plus-`RwLock<HashMap<..>>` pattern used for
//! other short-lived derived state in this crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::types::{EventType, SecurityEvent, Severity};

const CACHE_TTL: Duration = Duration::from_secs(15 * 60);
const RETENTION_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    OneHour,
    TwentyFourHours,
    SevenDays,
    ThirtyDays,
}

impl Timeframe {
    /// Unknown values default to 24h (spec.md §4.9).
    pub fn parse(value: &str) -> Self {
        match value {
            "1h" => Timeframe::OneHour,
            "7d" => Timeframe::SevenDays,
            "30d" => Timeframe::ThirtyDays,
            _ => Timeframe::TwentyFourHours,
        }
    }

    pub fn duration(self) -> chrono::Duration {
        match self {
            Timeframe::OneHour => chrono::Duration::hours(1),
            Timeframe::TwentyFourHours => chrono::Duration::hours(24),
            Timeframe::SevenDays => chrono::Duration::days(7),
            Timeframe::ThirtyDays => chrono::Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    Json,
    Summary,
    Html,
}

impl ReportFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "summary" => ReportFormat::Summary,
            "html" => ReportFormat::Html,
            _ => ReportFormat::Json,
        }
    }
}

/// Collects every event handed down from the pipeline's drain loop into a
/// bounded FIFO retention buffer, independent of the pipeline's own copy
/// (spec.md §4.7 step 2 routes to both retention and the aggregator).
pub struct ReportAggregator {
    events: Mutex<std::collections::VecDeque<SecurityEvent>>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(std::collections::VecDeque::with_capacity(RETENTION_CAPACITY)),
        }
    }

    pub fn record(&self, event: SecurityEvent) {
        let mut events = self.events.lock();
        if events.len() >= RETENTION_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn snapshot(&self) -> Vec<SecurityEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub window_start: chrono::DateTime<chrono::Utc>,
    pub window_end: chrono::DateTime<chrono::Utc>,
    pub total_events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventTypeSummary {
    pub event_type: String,
    pub count: usize,
    pub by_severity: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutiveSummary {
    pub status: String,
    pub risk_score: u32,
    pub top_event_types: Vec<EventTypeSummary>,
    pub affected_containers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityPosture {
    pub posture_score: u32,
    pub counts_by_category: HashMap<String, usize>,
    pub top_misconfigurations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreatAnalysis {
    pub threat_level: String,
    pub multi_vector_containers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceStatus {
    pub scores: HashMap<String, u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub executive_summary: ExecutiveSummary,
    pub security_posture: SecurityPosture,
    pub threat_analysis: ThreatAnalysis,
    pub compliance_status: ComplianceStatus,
    pub recommendations: Vec<String>,
    /// Populated only when `include_details` was requested: the raw events
    /// that fed this window, for callers that want per-event evidence
    /// rather than just the aggregated sections above.
    pub raw_events: Option<Vec<SecurityEvent>>,
}

impl Report {
    /// Renders the report in the requested wire format. `Json` is the
    /// structure above serialized directly; `Summary` and `Html` are
    /// derived human-readable views over the same sections.
    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
            ReportFormat::Summary => self.render_summary(),
            ReportFormat::Html => self.render_html(),
        }
    }

    fn render_summary(&self) -> String {
        format!(
            "Security Report ({} - {})\n\
             Status: {} (risk score {})\n\
             Events in window: {}\n\
             Posture score: {}/100\n\
             Threat level: {}\n\
             Recommendations:\n{}",
            self.metadata.window_start.to_rfc3339(),
            self.metadata.window_end.to_rfc3339(),
            self.executive_summary.status,
            self.executive_summary.risk_score,
            self.metadata.total_events,
            self.security_posture.posture_score,
            self.threat_analysis.threat_level,
            self.recommendations
                .iter()
                .map(|r| format!("  - {r}"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    fn render_html(&self) -> String {
        format!(
            "<html><body><h1>Security Report</h1>\
             <p>Status: <strong>{}</strong> (risk score {})</p>\
             <p>Window: {} &ndash; {}</p>\
             <p>Events in window: {}</p>\
             <p>Posture score: {}/100</p>\
             <p>Threat level: {}</p>\
             <ul>{}</ul>\
             </body></html>",
            self.executive_summary.status,
            self.executive_summary.risk_score,
            self.metadata.window_start.to_rfc3339(),
            self.metadata.window_end.to_rfc3339(),
            self.metadata.total_events,
            self.security_posture.posture_score,
            self.threat_analysis.threat_level,
            self.recommendations
                .iter()
                .map(|r| format!("<li>{r}</li>"))
                .collect::<String>(),
        )
    }
}

const CIS_KEYWORDS: &[&str] = &["privileged", "root", "capability", "docker socket"];
const NIST_KEYWORDS: &[&str] = &["network", "exfiltration", "scanning", "anomaly"];
const PCI_KEYWORDS: &[&str] = &["mount", "sensitive", "writable", "exposure"];

pub struct ReportGenerator {
    aggregator: Arc<ReportAggregator>,
    cache: RwLock<HashMap<(Timeframe, ReportFormat, bool), (Instant, Report)>>,
}

impl ReportGenerator {
    pub fn new(aggregator: Arc<ReportAggregator>) -> Self {
        Self {
            aggregator,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn generate(&self, timeframe: Timeframe, format: ReportFormat, include_details: bool) -> Report {
        let key = (timeframe, format, include_details);
        if let Some((cached_at, report)) = self.cache.read().get(&key) {
            if cached_at.elapsed() < CACHE_TTL {
                return report.clone();
            }
        }

        let report = self.build(timeframe, include_details);
        self.cache.write().insert(key, (Instant::now(), report.clone()));
        report
    }

    /// Invalidates every cached report. Called on config reload.
    pub fn invalidate_cache(&self) {
        self.cache.write().clear();
    }

    fn build(&self, timeframe: Timeframe, include_details: bool) -> Report {
        let now = chrono::Utc::now();
        let window_start = now - timeframe.duration();
        let events: Vec<SecurityEvent> = self
            .aggregator
            .snapshot()
            .into_iter()
            .filter(|e| e.timestamp >= window_start)
            .collect();

        Report {
            metadata: ReportMetadata {
                generated_at: now,
                window_start,
                window_end: now,
                total_events: events.len(),
            },
            executive_summary: build_executive_summary(&events),
            security_posture: build_security_posture(&events),
            threat_analysis: build_threat_analysis(&events),
            compliance_status: build_compliance_status(&events),
            recommendations: build_recommendations(&events),
            raw_events: if include_details { Some(events) } else { None },
        }
    }
}

fn build_executive_summary(events: &[SecurityEvent]) -> ExecutiveSummary {
    let risk_score: u32 = events.iter().map(|e| e.severity.weight()).sum();
    let critical = events.iter().filter(|e| e.severity == Severity::Critical).count();
    let high = events.iter().filter(|e| e.severity == Severity::High).count();
    let medium = events.iter().filter(|e| e.severity == Severity::Medium).count();

    let status = if critical > 0 {
        "CRITICAL"
    } else if high > 0 {
        "HIGH_RISK"
    } else if medium > 0 {
        "MEDIUM_RISK"
    } else {
        "HEALTHY"
    };

    let mut type_counts: HashMap<EventType, usize> = HashMap::new();
    let mut type_severity_counts: HashMap<EventType, HashMap<String, usize>> = HashMap::new();
    for event in events {
        *type_counts.entry(event.event_type).or_insert(0) += 1;
        *type_severity_counts
            .entry(event.event_type)
            .or_default()
            .entry(event.severity.to_string())
            .or_insert(0) += 1;
    }
    let mut top_event_types: Vec<EventTypeSummary> = type_counts
        .into_iter()
        .map(|(t, count)| EventTypeSummary {
            event_type: t.to_string(),
            count,
            by_severity: type_severity_counts.remove(&t).unwrap_or_default(),
        })
        .collect();
    top_event_types.sort_by(|a, b| b.count.cmp(&a.count));
    top_event_types.truncate(5);

    let affected_containers = events
        .iter()
        .map(|e| e.container_id.as_str())
        .filter(|id| !id.is_empty())
        .collect::<std::collections::HashSet<_>>()
        .len();

    ExecutiveSummary {
        status: status.to_string(),
        risk_score,
        top_event_types,
        affected_containers,
    }
}

fn build_security_posture(events: &[SecurityEvent]) -> SecurityPosture {
    let posture_events: Vec<&SecurityEvent> = events
        .iter()
        .filter(|e| matches!(e.event_type, EventType::SecurityMisconfiguration | EventType::SecurityRecommendation))
        .collect();

    let weight_sum: u32 = posture_events.iter().map(|e| e.severity.weight()).sum();
    let posture_score = 100u32.saturating_sub(weight_sum.min(100));

    let mut counts_by_category: HashMap<String, usize> = HashMap::new();
    let mut labels: HashMap<String, usize> = HashMap::new();
    for event in &posture_events {
        let category = categorize_posture_event(&event.description);
        *counts_by_category.entry(category).or_insert(0) += 1;
        *labels.entry(event.description.clone()).or_insert(0) += 1;
    }
    let mut top_misconfigurations: Vec<(String, usize)> = labels.into_iter().collect();
    top_misconfigurations.sort_by(|a, b| b.1.cmp(&a.1));
    let top_misconfigurations = top_misconfigurations.into_iter().take(10).map(|(label, _)| label).collect();

    SecurityPosture {
        posture_score,
        counts_by_category,
        top_misconfigurations,
    }
}

fn categorize_posture_event(description: &str) -> String {
    let lower = description.to_lowercase();
    if lower.contains("privileged") {
        "privileged".to_string()
    } else if lower.contains("root") {
        "root".to_string()
    } else if lower.contains("mount") || lower.contains("docker socket") {
        "mounts".to_string()
    } else if lower.contains("port") || lower.contains("network") {
        "exposure".to_string()
    } else if lower.contains("capabilit") {
        "capability".to_string()
    } else {
        "resource_limit".to_string()
    }
}

const THREAT_EVENT_TYPES: &[EventType] = &[
    EventType::SuspiciousProcess,
    EventType::NetworkAnomaly,
    EventType::DataExfiltration,
    EventType::NetworkScanning,
];

fn build_threat_analysis(events: &[SecurityEvent]) -> ThreatAnalysis {
    let threat_events: Vec<&SecurityEvent> = events
        .iter()
        .filter(|e| THREAT_EVENT_TYPES.contains(&e.event_type))
        .collect();

    let threat_level = match threat_events.len() {
        0 => "NONE",
        1..=3 => "LOW",
        4..=10 => "MODERATE",
        _ => "SEVERE",
    };

    let mut per_container: HashMap<String, std::collections::HashSet<EventType>> = HashMap::new();
    for event in &threat_events {
        per_container
            .entry(event.container_id.clone())
            .or_default()
            .insert(event.event_type);
    }
    let multi_vector_containers: Vec<String> = per_container
        .into_iter()
        .filter(|(id, types)| !id.is_empty() && types.len() >= 3)
        .map(|(id, _)| id)
        .collect();

    ThreatAnalysis {
        threat_level: threat_level.to_string(),
        multi_vector_containers,
    }
}

fn build_compliance_status(events: &[SecurityEvent]) -> ComplianceStatus {
    let mut scores = HashMap::new();
    scores.insert("cis_docker".to_string(), framework_score(events, CIS_KEYWORDS));
    scores.insert("nist".to_string(), framework_score(events, NIST_KEYWORDS));
    scores.insert("pci_dss".to_string(), framework_score(events, PCI_KEYWORDS));
    ComplianceStatus { scores }
}

fn framework_score(events: &[SecurityEvent], keywords: &[&str]) -> u32 {
    let matching_weight: u32 = events
        .iter()
        .filter(|e| {
            let lower = e.description.to_lowercase();
            keywords.iter().any(|k| lower.contains(k))
        })
        .map(|e| e.severity.weight())
        .sum();
    100u32.saturating_sub(matching_weight.min(100))
}

fn build_recommendations(events: &[SecurityEvent]) -> Vec<String> {
    let mut recommendations = Vec::new();
    let count_of = |event_type: EventType| events.iter().filter(|e| e.event_type == event_type).count();

    if count_of(EventType::SecurityMisconfiguration) > 0 {
        recommendations.push("Review and remediate flagged security misconfigurations.".to_string());
    }
    if count_of(EventType::SuspiciousProcess) > 0 {
        recommendations.push("Investigate suspicious process activity in affected containers.".to_string());
    }
    if count_of(EventType::NetworkScanning) > 0 {
        recommendations.push("Isolate containers exhibiting scanning behavior and review network policy.".to_string());
    }
    if count_of(EventType::DataExfiltration) > 0 {
        recommendations.push("Investigate potential data exfiltration and restrict egress where possible.".to_string());
    }
    if count_of(EventType::ResourceAnomaly) > 0 || count_of(EventType::BehavioralAnomaly) > 0 {
        recommendations.push("Review resource limits and baseline thresholds for affected containers.".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("No immediate action required; continue routine monitoring.".to_string());
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    #[test]
    fn healthy_report_when_no_events() {
        let aggregator = Arc::new(ReportAggregator::new());
        let generator = ReportGenerator::new(aggregator);
        let report = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, false);
        assert_eq!(report.executive_summary.status, "HEALTHY");
    }

    #[test]
    fn critical_event_drives_critical_status() {
        let aggregator = Arc::new(ReportAggregator::new());
        aggregator.record(
            SecurityEvent::new(EventType::SecurityMisconfiguration, Severity::Critical, "test", "privileged mode")
                .with_container("c1", "web"),
        );
        let generator = ReportGenerator::new(aggregator);
        let report = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, false);
        assert_eq!(report.executive_summary.status, "CRITICAL");
        assert_eq!(report.executive_summary.affected_containers, 1);
    }

    #[test]
    fn multi_vector_attack_detected_at_three_distinct_types() {
        let aggregator = Arc::new(ReportAggregator::new());
        for event_type in [EventType::SuspiciousProcess, EventType::NetworkAnomaly, EventType::DataExfiltration] {
            aggregator.record(
                SecurityEvent::new(event_type, Severity::High, "test", "threat").with_container("c1", "web"),
            );
        }
        let generator = ReportGenerator::new(aggregator);
        let report = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, false);
        assert!(report.threat_analysis.multi_vector_containers.contains(&"c1".to_string()));
    }

    #[test]
    fn include_details_populates_raw_events_and_omits_them_otherwise() {
        let aggregator = Arc::new(ReportAggregator::new());
        aggregator.record(SecurityEvent::new(EventType::ResourceAnomaly, Severity::Low, "test", "x"));
        let generator = ReportGenerator::new(aggregator);

        let without_details = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, false);
        assert!(without_details.raw_events.is_none());

        let with_details = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Summary, true);
        assert_eq!(with_details.raw_events.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn render_produces_distinct_output_per_format() {
        let aggregator = Arc::new(ReportAggregator::new());
        aggregator.record(
            SecurityEvent::new(EventType::SecurityMisconfiguration, Severity::Critical, "test", "privileged mode")
                .with_container("c1", "web"),
        );
        let generator = ReportGenerator::new(aggregator);
        let report = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, false);

        let json = report.render(ReportFormat::Json);
        let summary = report.render(ReportFormat::Summary);
        let html = report.render(ReportFormat::Html);

        assert!(json.contains("\"executive_summary\""));
        assert!(summary.contains("Status: CRITICAL"));
        assert!(html.starts_with("<html>"));
    }

    #[test]
    fn cached_report_is_reused_within_ttl() {
        let aggregator = Arc::new(ReportAggregator::new());
        let generator = ReportGenerator::new(aggregator.clone());
        let first = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, false);
        aggregator.record(SecurityEvent::new(EventType::ResourceAnomaly, Severity::Low, "test", "x"));
        let second = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, false);
        assert_eq!(first.metadata.total_events, second.metadata.total_events);
    }
}
