//! Configuration: the validated [`MonitorConfig`] the core consumes, plus an
//! ambient file+environment loader (an external collaborator in spec.md,
//! but one a complete repo still needs — see SPEC_FULL.md §6).

use std::time::Duration;

use hmac::Hmac;
use pbkdf2::pbkdf2;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{MonitorError, Result};

/// Recognized configuration options (spec.md §3 MonitorConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub monitor_interval: u64,
    pub report_interval: u64,
    pub retention_days: u64,

    pub container_patterns: Vec<String>,

    pub network_monitoring: bool,
    pub file_monitoring: bool,
    pub process_monitoring: bool,
    pub behavioral_analysis: bool,

    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub network_threshold_mbps: f64,
    pub file_change_threshold: u32,

    pub allowed_ports: Vec<u16>,
    pub blocked_processes: Vec<String>,
    pub monitored_directories: Vec<String>,
    pub dangerous_capabilities: Vec<String>,
    pub sensitive_directories: Vec<String>,

    pub alert_webhook: Option<String>,
    pub alert_secret_key: String,
    pub alert_timeout_secs: u64,
    pub max_timestamp_skew_secs: i64,
    pub max_concurrent_containers: usize,
    pub alert_rate_limit: u32,

    pub baseline_max_age_hours: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: 30,
            report_interval: 300,
            retention_days: 30,
            container_patterns: vec!["*".to_string()],
            network_monitoring: true,
            file_monitoring: true,
            process_monitoring: true,
            behavioral_analysis: true,
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            network_threshold_mbps: 100.0,
            file_change_threshold: 100,
            allowed_ports: vec![80, 443, 8080, 3000, 4173, 5173],
            blocked_processes: vec![
                "nc".to_string(),
                "netcat".to_string(),
                "telnet".to_string(),
                "ftp".to_string(),
            ],
            monitored_directories: vec![
                "/etc".to_string(),
                "/usr/bin".to_string(),
                "/usr/sbin".to_string(),
            ],
            dangerous_capabilities: crate::types::DANGEROUS_CAPABILITIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            sensitive_directories: crate::types::SENSITIVE_DIRECTORIES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            alert_webhook: None,
            alert_secret_key: String::new(),
            alert_timeout_secs: 30,
            max_timestamp_skew_secs: 300,
            max_concurrent_containers: 10,
            alert_rate_limit: 50,
            baseline_max_age_hours: 24,
        }
    }
}

impl MonitorConfig {
    pub fn alert_timeout(&self) -> Duration {
        Duration::from_secs(self.alert_timeout_secs)
    }

    pub fn baseline_max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.baseline_max_age_hours as i64)
    }

    /// Validate the invariants named in spec.md §3. Called once at load
    /// time; failure is fatal (`MonitorError::Configuration`).
    pub fn validate(&self) -> Result<()> {
        if self.container_patterns.is_empty() {
            return Err(MonitorError::Configuration(
                "container_patterns must not be empty".into(),
            ));
        }
        if self.monitor_interval < 1 {
            return Err(MonitorError::Configuration(
                "monitor_interval must be >= 1".into(),
            ));
        }
        if self.monitor_interval >= self.report_interval {
            return Err(MonitorError::Configuration(
                "monitor_interval must be < report_interval".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.cpu_threshold) {
            return Err(MonitorError::Configuration(
                "cpu_threshold must be in 0..=100".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.memory_threshold) {
            return Err(MonitorError::Configuration(
                "memory_threshold must be in 0..=100".into(),
            ));
        }
        if self.network_threshold_mbps < 0.0 {
            return Err(MonitorError::Configuration(
                "network_threshold_mbps must be >= 0".into(),
            ));
        }
        if let Some(webhook) = &self.alert_webhook {
            let is_localhost = webhook.contains("://localhost") || webhook.contains("://127.0.0.1");
            if !webhook.starts_with("https://") && !is_localhost {
                return Err(MonitorError::Configuration(
                    "alert_webhook must be HTTPS unless host is localhost".into(),
                ));
            }
            if self.alert_secret_key.as_bytes().len() < 32 {
                return Err(MonitorError::Configuration(
                    "alert_secret_key must be at least 32 bytes".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Fixed environment-variable overrides, matching the original Python
/// loader's `_apply_env_overrides` mapping exactly (SPEC_FULL.md §6).
const ENV_MAPPING: &[(&str, &str)] = &[
    ("MONITOR_INTERVAL", "monitor_interval"),
    ("MONITOR_REPORT_INTERVAL", "report_interval"),
    ("MONITOR_RETENTION_DAYS", "retention_days"),
    ("MONITOR_CPU_THRESHOLD", "cpu_threshold"),
    ("MONITOR_MEMORY_THRESHOLD", "memory_threshold"),
    ("MONITOR_NETWORK_THRESHOLD", "network_threshold_mbps"),
    ("MONITOR_FILE_THRESHOLD", "file_change_threshold"),
    ("MONITOR_NETWORK_MONITORING", "network_monitoring"),
    ("MONITOR_FILE_MONITORING", "file_monitoring"),
    ("MONITOR_PROCESS_MONITORING", "process_monitoring"),
    ("MONITOR_BEHAVIORAL_ANALYSIS", "behavioral_analysis"),
    ("MONITOR_WEBHOOK_URL", "alert_webhook"),
    ("MONITOR_ALERT_SECRET_KEY", "alert_secret_key"),
    ("MONITOR_ALERT_TIMEOUT", "alert_timeout_secs"),
    ("MONITOR_MAX_CONCURRENT", "max_concurrent_containers"),
];

/// Loads a `MonitorConfig` from an optional YAML/JSON file, layers
/// environment-variable overrides on top, then validates. This loader is
/// ambient scaffolding (spec.md names config loading an external
/// collaborator) so the crate is runnable end to end; the core itself only
/// ever consumes the already-validated `MonitorConfig` this produces.
pub struct ConfigLoader {
    path: Option<std::path::PathBuf>,
}

impl ConfigLoader {
    pub fn new(path: Option<std::path::PathBuf>) -> Self {
        let _ = dotenvy::dotenv();
        Self { path }
    }

    pub fn load(&self) -> Result<MonitorConfig> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&MonitorConfig::default()).map_err(
                |e| MonitorError::Configuration(format!("failed to seed defaults: {e}")),
            )?);

        if let Some(path) = &self.path {
            if path.exists() {
                builder = builder.add_source(::config::File::from(path.as_path()));
            } else {
                tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            }
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("MONITOR_RAW")
                .try_parsing(true)
                .separator("__"),
        );

        let raw = builder
            .build()
            .map_err(|e| MonitorError::Configuration(format!("failed to build config: {e}")))?;

        let mut config: MonitorConfig = raw
            .try_deserialize()
            .map_err(|e| MonitorError::Configuration(format!("failed to deserialize config: {e}")))?;

        apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }
}

fn apply_env_overrides(config: &mut MonitorConfig) {
    for (env_var, field) in ENV_MAPPING {
        let Ok(value) = std::env::var(env_var) else {
            continue;
        };
        set_field(config, field, &value);
    }

    if let Ok(patterns) = std::env::var("MONITOR_CONTAINER_PATTERNS") {
        config.container_patterns = patterns
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Ok(ports) = std::env::var("MONITOR_ALLOWED_PORTS") {
        let parsed: std::result::Result<Vec<u16>, _> =
            ports.split(',').map(|s| s.trim().parse::<u16>()).collect();
        if let Ok(parsed) = parsed {
            config.allowed_ports = parsed;
        } else {
            tracing::warn!(value = %ports, "invalid MONITOR_ALLOWED_PORTS format, ignoring");
        }
    }
}

fn set_field(config: &mut MonitorConfig, field: &str, value: &str) {
    match field {
        "monitor_interval" => parse_into(value, &mut config.monitor_interval),
        "report_interval" => parse_into(value, &mut config.report_interval),
        "retention_days" => parse_into(value, &mut config.retention_days),
        "cpu_threshold" => parse_into(value, &mut config.cpu_threshold),
        "memory_threshold" => parse_into(value, &mut config.memory_threshold),
        "network_threshold_mbps" => parse_into(value, &mut config.network_threshold_mbps),
        "file_change_threshold" => parse_into(value, &mut config.file_change_threshold),
        "network_monitoring" => config.network_monitoring = parse_bool(value),
        "file_monitoring" => config.file_monitoring = parse_bool(value),
        "process_monitoring" => config.process_monitoring = parse_bool(value),
        "behavioral_analysis" => config.behavioral_analysis = parse_bool(value),
        "alert_webhook" => config.alert_webhook = Some(value.to_string()),
        "alert_secret_key" => config.alert_secret_key = value.to_string(),
        "alert_timeout_secs" => parse_into(value, &mut config.alert_timeout_secs),
        "max_concurrent_containers" => parse_into(value, &mut config.max_concurrent_containers),
        _ => {}
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, target: &mut T) {
    if let Ok(parsed) = value.parse() {
        *target = parsed;
    } else {
        tracing::warn!(value = %value, "failed to parse environment override, ignoring");
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Derives an at-rest encryption key from a user-supplied password via
/// PBKDF2-HMAC-SHA256 with a fixed-per-install salt, resolving the Open
/// Question in spec.md §9 (the original generated an unrelated key). The
/// iteration count is fixed above the 100,000 floor spec.md requires.
pub fn derive_secret_key(password: &str, install_salt: &[u8]) -> [u8; 32] {
    const ITERATIONS: u32 = 120_000;
    let mut key = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), install_salt, ITERATIONS, &mut key)
        .expect("HMAC can be initialized with any key length");
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        MonitorConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_container_patterns_rejected() {
        let mut config = MonitorConfig::default();
        config.container_patterns.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn monitor_interval_must_be_less_than_report_interval() {
        let mut config = MonitorConfig::default();
        config.monitor_interval = config.report_interval;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_https_webhook_rejected_unless_localhost() {
        let mut config = MonitorConfig::default();
        config.alert_secret_key = "x".repeat(32);
        config.alert_webhook = Some("http://example.com/hook".to_string());
        assert!(config.validate().is_err());

        config.alert_webhook = Some("http://localhost:8080/hook".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn short_secret_key_rejected() {
        let mut config = MonitorConfig::default();
        config.alert_webhook = Some("https://example.com/hook".to_string());
        config.alert_secret_key = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let salt = b"install-salt";
        let a = derive_secret_key("hunter2", salt);
        let b = derive_secret_key("hunter2", salt);
        assert_eq!(a, b);
        let c = derive_secret_key("different", salt);
        assert_ne!(a, c);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("MONITOR_CPU_THRESHOLD", "55.0");
        std::env::set_var("MONITOR_CONTAINER_PATTERNS", "web-*, db-*");
        let mut config = MonitorConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.cpu_threshold, 55.0);
        assert_eq!(config.container_patterns, vec!["web-*", "db-*"]);
        std::env::remove_var("MONITOR_CPU_THRESHOLD");
        std::env::remove_var("MONITOR_CONTAINER_PATTERNS");
    }
}
