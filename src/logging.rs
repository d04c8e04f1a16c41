//! Structured logging built around a constructed (not global-`static`)
//! logger that installs a `tracing` subscriber once, tags entries with a
//! [`LogCategory`], and keeps a bounded in-memory audit trail for
//! security/audit-category entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::MonitorConfig;

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Tags attached to each log entry, grouping entries by monitor subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogCategory {
    Scheduler,
    Analyzer,
    Baseline,
    Pipeline,
    Alert,
    Report,
    Runtime,
    Audit,
    Security,
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogCategory::Scheduler => "scheduler",
            LogCategory::Analyzer => "analyzer",
            LogCategory::Baseline => "baseline",
            LogCategory::Pipeline => "pipeline",
            LogCategory::Alert => "alert",
            LogCategory::Report => "report",
            LogCategory::Runtime => "runtime",
            LogCategory::Audit => "audit",
            LogCategory::Security => "security",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub category: LogCategory,
    pub message: String,
    pub data: serde_json::Value,
}

/// A constructed logger: installs a global `tracing` subscriber the first
/// time any instance in the process is built (subscribers genuinely are
/// process-global in `tracing`'s design), but keeps its own audit buffer
/// and configuration rather than relying on a `Lazy<...>` singleton —
/// callers hold the `Arc` they constructed.
pub struct ProductionLogger {
    audit_buffer: Mutex<Vec<AuditEntry>>,
    _file_guard: Option<WorkerGuard>,
}

impl ProductionLogger {
    /// Build a logger writing structured JSON logs to a rolling file,
    /// sized from the monitor's configuration.
    pub fn new(_config: &MonitorConfig) -> Self {
        let file_guard = Self::install_subscriber(true);
        Self {
            audit_buffer: Mutex::new(Vec::new()),
            _file_guard: file_guard,
        }
    }

    /// Console-only logger for tests.
    pub fn new_minimal() -> Self {
        let file_guard = Self::install_subscriber(false);
        Self {
            audit_buffer: Mutex::new(Vec::new()),
            _file_guard: file_guard,
        }
    }

    fn install_subscriber(file_enabled: bool) -> Option<WorkerGuard> {
        if TRACING_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        if file_enabled {
            let file_appender = tracing_appender::rolling::daily("logs", "monitor.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(non_blocking));
            let _ = subscriber.try_init();
            Some(guard)
        } else {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer());
            let _ = subscriber.try_init();
            None
        }
    }

    pub fn audit(&self, category: LogCategory, message: &str, data: serde_json::Value) {
        tracing::info!(category = %category, audit = true, %message, ?data);
        let mut buffer = self.audit_buffer.lock();
        buffer.push(AuditEntry {
            timestamp: chrono::Utc::now(),
            category,
            message: message.to_string(),
            data,
        });
        if buffer.len() > 10_000 {
            buffer.drain(0..1_000);
        }
    }

    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.audit_buffer.lock().clone()
    }

    pub fn info(&self, category: LogCategory, message: &str) {
        tracing::info!(category = %category, "{message}");
    }

    pub fn warn(&self, category: LogCategory, message: &str) {
        tracing::warn!(category = %category, "{message}");
    }

    pub fn error(&self, category: LogCategory, message: &str) {
        tracing::error!(category = %category, "{message}");
    }

    pub fn security(&self, message: &str, data: serde_json::Value) {
        self.audit(LogCategory::Security, message, data);
    }
}

/// Convenience wrapper so analyzers can time an operation without holding
/// onto the logger on drop.
pub struct PerformanceTimer {
    logger: Arc<ProductionLogger>,
    category: LogCategory,
    operation: String,
    start: std::time::Instant,
}

impl PerformanceTimer {
    pub fn start(logger: Arc<ProductionLogger>, category: LogCategory, operation: impl Into<String>) -> Self {
        Self {
            logger,
            category,
            operation: operation.into(),
            start: std::time::Instant::now(),
        }
    }

    pub fn finish(self) {
        // Drop does the actual logging; this just makes the intent explicit
        // at call sites that want an early stop.
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.logger.info(self.category, &format!("{} finished in {:?}", self.operation, elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_trail_accumulates_entries() {
        let logger = ProductionLogger::new_minimal();
        logger.audit(LogCategory::Security, "test event", serde_json::json!({"k": "v"}));
        assert_eq!(logger.audit_trail().len(), 1);
    }
}
