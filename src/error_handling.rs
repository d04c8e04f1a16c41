//! Circuit breaker and retry-with-backoff primitives shared by the runtime
//! client (§4.1) and the alert sender (§4.8).
//!
//! The closed/open/half-open state machine sits behind a single lock,
//! paired with a `RetryConfig` shape using exponential backoff plus
//! jitter, and a per-component error-statistics map for observability.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Circuit breaker state, per spec.md §3: `CLOSED -> OPEN -> HALF_OPEN -> CLOSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// A single circuit breaker guarding one downstream dependency. One success
/// in `HalfOpen` closes it; one failure anywhere re-opens it (spec.md §4.1:
/// "A single success in HALF_OPEN closes the breaker; a failure re-opens
/// it").
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitBreakerInner>,
}

struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                next_attempt_at: None,
            }),
        }
    }

    /// Whether a call is currently allowed. Transitions `Open -> HalfOpen`
    /// when the recovery timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.state.write();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.next_attempt_at.is_some_and(|at| Instant::now() >= at) {
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.state.write();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.next_attempt_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.state.write();
        inner.failure_count += 1;
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(Instant::now() + self.config.recovery_timeout);
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().state
    }
}

/// Retry configuration for the alert sender's backoff (spec.md §4.8:
/// 100ms, 400ms, 1.6s for three retries — a multiplier of 4 from a 100ms
/// base).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 4.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before the `attempt`-th retry (0-indexed), with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let jitter = base * self.jitter_factor * rand::thread_rng().gen_range(-1.0..=1.0);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }
}

/// Error counters observed per component; `queue_full`, `alert_failed`, and
/// runtime-transient-error counts all land here (spec.md §7).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub errors_by_kind: HashMap<String, u64>,
}

/// Tracks per-component error counters and hosts the circuit breakers used
/// by the runtime client. Constructed once per [`crate::Registry`].
pub struct ErrorHandler {
    stats: RwLock<HashMap<String, ErrorStats>>,
    breakers: RwLock<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, component: &str, kind: &str) {
        let mut stats = self.stats.write();
        let entry = stats.entry(component.to_string()).or_default();
        entry.total_errors += 1;
        *entry.errors_by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn stats_for(&self, component: &str) -> ErrorStats {
        self.stats.read().get(component).cloned().unwrap_or_default()
    }

    pub fn all_stats(&self) -> HashMap<String, ErrorStats> {
        self.stats.read().clone()
    }

    /// Get or create the named circuit breaker.
    pub fn breaker(&self, name: &str, config: CircuitBreakerConfig) -> std::sync::Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(config)))
            .clone()
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_failures_open_the_circuit() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(50),
        });
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_after_recovery_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(10),
        });
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn retry_delays_grow_with_backoff() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(400));
        assert_eq!(config.delay_for(2), Duration::from_millis(1600));
    }
}
