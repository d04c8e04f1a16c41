//! # Container Security Monitor
//!
//! Runtime security monitor for containerized workloads. The orchestrator
//! ticks on `monitor_interval`, discovers containers matching configured
//! glob patterns, fans per-container analysis out across a bounded
//! executor, and routes the resulting [`types::SecurityEvent`]s through a
//! bounded [`pipeline::EventPipeline`] into retention, reporting, and
//! signed webhook alerting.
//!
//! ## Architecture
//!
//! - [`runtime_client`] — adapter over a container runtime, gated by a
//!   [`error_handling::CircuitBreaker`].
//! - [`baseline`] — per-container rolling statistics used by the analyzers
//!   to detect deviation from normal behavior.
//! - [`analyzers`] — behavior, network, posture and filesystem analyzers.
//! - [`executor`] — bounded-concurrency per-container job runner.
//! - [`pipeline`] — bounded event queue with a retention buffer.
//! - [`alert`] — HMAC-signed webhook delivery with retry/backoff and a
//!   rolling rate limit.
//! - [`report`] — time-window report aggregation with a short-TTL cache.
//! - [`orchestrator`] — top-level scheduler owning the lifecycles above.
//!
//! Nothing in this crate is a process-global singleton: every component is
//! constructed explicitly and wired together through a [`Registry`] so that
//! tests can instantiate independent cores side by side.

pub mod alert;
pub mod analyzers;
pub mod baseline;
pub mod config;
pub mod error_handling;
pub mod executor;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod runtime_client;
pub mod types;

use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::error_handling::ErrorHandler;
use crate::health::HealthState;
use crate::logging::ProductionLogger;
use crate::metrics::MetricsRegistry;

/// Comprehensive error type covering every subsystem in the monitor.
///
/// Mirrors the error-handling design: most variants are recovered locally
/// and only ever observed via a counter or a synthetic `analysis_error`
/// event. `Configuration`, `RuntimeUnavailable` and `ShutdownAbort` are the
/// only variants meant to propagate out of [`orchestrator::MonitorOrchestrator::run`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum MonitorError {
    /// Container runtime call failed after retries/circuit-breaker checks.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Container vanished between list and a subsequent call. Recoverable,
    /// never surfaced as an event.
    #[error("container not found: {0}")]
    NotFound(String),

    /// An analyzer raised an exception-equivalent during a scan.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Event pipeline was full; the event was dropped.
    #[error("event queue full")]
    QueueFull,

    /// Webhook delivery failed after the configured retry policy.
    #[error("alert delivery failed: {0}")]
    DeliveryFailed(String),

    /// Configuration failed validation at load time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The runtime client has been unavailable longer than the circuit
    /// breaker's recovery timeout during startup.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Executor grace period exceeded during shutdown.
    #[error("shutdown aborted: {0}")]
    ShutdownAbort(String),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Dependency-injected bundle of cross-cutting services.
///
/// Replaces the "global metrics / global health checker" pattern: every
/// subsystem takes a `Registry` (or a clone of one of its fields) at
/// construction time rather than reaching for a process-wide singleton.
/// Tests build independent `Registry`s so cores never share state.
#[derive(Clone)]
pub struct Registry {
    pub logger: Arc<ProductionLogger>,
    pub metrics: Arc<MetricsRegistry>,
    pub health: Arc<HealthState>,
    pub errors: Arc<ErrorHandler>,
}

impl Registry {
    /// Build a fresh registry. Called once from `main`; every long-lived
    /// component below receives a clone of the `Arc`s it needs.
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            logger: Arc::new(ProductionLogger::new(config)),
            metrics: Arc::new(MetricsRegistry::new()),
            health: Arc::new(HealthState::new()),
            errors: Arc::new(ErrorHandler::new()),
        }
    }

    /// Build a registry with a minimal, console-only logger. Useful for
    /// tests that don't want to touch the filesystem.
    pub fn for_tests() -> Self {
        Self {
            logger: Arc::new(ProductionLogger::new_minimal()),
            metrics: Arc::new(MetricsRegistry::new()),
            health: Arc::new(HealthState::new()),
            errors: Arc::new(ErrorHandler::new()),
        }
    }
}
