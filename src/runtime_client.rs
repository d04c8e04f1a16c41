//! Container runtime adapter (spec.md §4.1): `List`/`Inspect`/`Stats`/
//! `Processes`, gated by a [`crate::error_handling::CircuitBreaker`].
//!
//! Follows a trait-plus-concrete-client-plus-error-taxonomy shape, with
//! [`crate::error_handling::CircuitBreaker`] wrapping every call; the
//! three-way `NotFound`/`Transient`/`Fatal` split is named directly in
//! spec.md §4.1.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error_handling::{CircuitBreaker, CircuitBreakerConfig, ErrorHandler};
use crate::types::{ContainerDetail, ContainerSummary, ProcessList, StatsSnapshot};

const CIRCUIT_BREAKER_NAME: &str = "runtime_client";

#[derive(thiserror::Error, Debug, Clone)]
pub enum RuntimeError {
    /// Container no longer exists. Never retried.
    #[error("container not found: {0}")]
    NotFound(String),

    /// Socket/timeout/temporary daemon error. Eligible for retry and counts
    /// toward the circuit breaker.
    #[error("transient runtime error: {0}")]
    Transient(String),

    /// Malformed response, permission denied, or another error that retrying
    /// cannot fix.
    #[error("fatal runtime error: {0}")]
    Fatal(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Abstraction over a container runtime (Docker-engine-compatible API,
/// spec.md §6). Implementations talk to the daemon; tests substitute
/// [`MockRuntimeClient`].
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn list(&self) -> RuntimeResult<Vec<ContainerSummary>>;
    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDetail>;
    async fn stats(&self, container_id: &str) -> RuntimeResult<StatsSnapshot>;
    async fn processes(&self, container_id: &str) -> RuntimeResult<ProcessList>;
}

/// Wraps any [`RuntimeClient`] with circuit-breaker gating and error-stat
/// recording, so callers never talk to the inner client directly.
pub struct GuardedRuntimeClient {
    inner: Arc<dyn RuntimeClient>,
    breaker: Arc<CircuitBreaker>,
    errors: Arc<ErrorHandler>,
}

impl GuardedRuntimeClient {
    pub fn new(inner: Arc<dyn RuntimeClient>, errors: Arc<ErrorHandler>) -> Self {
        let breaker = errors.breaker(
            CIRCUIT_BREAKER_NAME,
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(30),
            },
        );
        Self { inner, breaker, errors }
    }

    fn record_outcome(&self, result: &RuntimeResult<impl Sized>) {
        match result {
            Ok(_) => self.breaker.record_success(),
            Err(RuntimeError::NotFound(_)) => {
                // A vanished container is expected churn, not a runtime fault.
            }
            Err(RuntimeError::Transient(_)) => {
                self.breaker.record_failure();
                self.errors.record(CIRCUIT_BREAKER_NAME, "transient");
            }
            Err(RuntimeError::Fatal(_)) => {
                self.breaker.record_failure();
                self.errors.record(CIRCUIT_BREAKER_NAME, "fatal");
            }
        }
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    /// Spec.md §4.1: while the breaker is open, Stats/Processes/Inspect
    /// return `Transient` immediately without attempting the call.
    async fn guarded<T, F>(&self, call: F) -> RuntimeResult<T>
    where
        F: std::future::Future<Output = RuntimeResult<T>>,
    {
        if !self.breaker.can_execute() {
            return Err(RuntimeError::Transient("circuit breaker open".to_string()));
        }
        let result = call.await;
        self.record_outcome(&result);
        result
    }
}

#[async_trait]
impl RuntimeClient for GuardedRuntimeClient {
    async fn list(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        self.guarded(self.inner.list()).await
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDetail> {
        self.guarded(self.inner.inspect(container_id)).await
    }

    async fn stats(&self, container_id: &str) -> RuntimeResult<StatsSnapshot> {
        self.guarded(self.inner.stats(container_id)).await
    }

    async fn processes(&self, container_id: &str) -> RuntimeResult<ProcessList> {
        self.guarded(self.inner.processes(container_id)).await
    }
}

/// Talks to a Docker-engine-compatible HTTP API (spec.md §6's
/// Docker-engine-style schema). Expects `base_url` to point at an
/// HTTP-exposed engine socket (e.g. `http://localhost:2375` or a local
/// `socat`/proxy in front of `/var/run/docker.sock`); this crate does not
/// itself speak the Unix-socket transport, keeping `reqwest` as the only
/// HTTP client dependency rather than pulling in a socket-aware fork of
/// it.
pub struct DockerRuntimeClient {
    client: reqwest::Client,
    base_url: String,
}

impl DockerRuntimeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn classify_status(status: reqwest::StatusCode, context: &str) -> RuntimeError {
        if status == reqwest::StatusCode::NOT_FOUND {
            RuntimeError::NotFound(context.to_string())
        } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            RuntimeError::Transient(format!("{context}: {status}"))
        } else {
            RuntimeError::Fatal(format!("{context}: {status}"))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, context: &str) -> RuntimeResult<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| RuntimeError::Transient(format!("{context}: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::classify_status(response.status(), context));
        }

        response
            .json()
            .await
            .map_err(|e| RuntimeError::Fatal(format!("{context}: malformed response: {e}")))
    }
}

#[derive(serde::Deserialize)]
struct DockerContainerSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names")]
    names: Vec<String>,
    #[serde(rename = "State")]
    state: String,
}

#[async_trait]
impl RuntimeClient for DockerRuntimeClient {
    async fn list(&self) -> RuntimeResult<Vec<ContainerSummary>> {
        let raw: Vec<DockerContainerSummary> = self.get_json("/containers/json", "list").await?;
        Ok(raw
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id,
                name: c.names.into_iter().next().unwrap_or_default().trim_start_matches('/').to_string(),
                status: c.state,
            })
            .collect())
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDetail> {
        self.get_json(&format!("/containers/{container_id}/json"), "inspect").await
    }

    async fn stats(&self, container_id: &str) -> RuntimeResult<StatsSnapshot> {
        self.get_json(&format!("/containers/{container_id}/stats?stream=false"), "stats").await
    }

    async fn processes(&self, container_id: &str) -> RuntimeResult<ProcessList> {
        self.get_json(&format!("/containers/{container_id}/top"), "processes").await
    }
}

/// In-memory runtime double, also used by integration tests in `tests/`.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory runtime double keyed by container id. Tests populate
    /// `containers`/`stats`/`processes` and optionally force an error for a
    /// given id via `fail_with`.
    #[derive(Default)]
    pub struct MockRuntimeClient {
        pub containers: Mutex<Vec<ContainerSummary>>,
        pub details: Mutex<HashMap<String, ContainerDetail>>,
        pub stats: Mutex<HashMap<String, StatsSnapshot>>,
        pub processes: Mutex<HashMap<String, ProcessList>>,
        pub fail_with: Mutex<HashMap<String, RuntimeError>>,
    }

    impl MockRuntimeClient {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RuntimeClient for MockRuntimeClient {
        async fn list(&self) -> RuntimeResult<Vec<ContainerSummary>> {
            Ok(self.containers.lock().clone())
        }

        async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDetail> {
            if let Some(err) = self.fail_with.lock().get(container_id) {
                return Err(err.clone());
            }
            self.details
                .lock()
                .get(container_id)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
        }

        async fn stats(&self, container_id: &str) -> RuntimeResult<StatsSnapshot> {
            if let Some(err) = self.fail_with.lock().get(container_id) {
                return Err(err.clone());
            }
            self.stats
                .lock()
                .get(container_id)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
        }

        async fn processes(&self, container_id: &str) -> RuntimeResult<ProcessList> {
            if let Some(err) = self.fail_with.lock().get(container_id) {
                return Err(err.clone());
            }
            Ok(self.processes.lock().get(container_id).cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockRuntimeClient;
    use super::*;
    use crate::error_handling::ErrorHandler;

    #[tokio::test]
    async fn not_found_does_not_trip_the_breaker() {
        let mock = Arc::new(MockRuntimeClient::new());
        let errors = Arc::new(ErrorHandler::new());
        let client = GuardedRuntimeClient::new(mock, errors);

        for _ in 0..10 {
            let _ = client.inspect("missing").await;
        }
        assert_eq!(client.breaker().state(), crate::error_handling::CircuitState::Closed);
    }

    #[tokio::test]
    async fn transient_failures_open_the_breaker() {
        let mock = Arc::new(MockRuntimeClient::new());
        mock.fail_with
            .lock()
            .insert("flaky".to_string(), RuntimeError::Transient("timeout".to_string()));
        let errors = Arc::new(ErrorHandler::new());
        let client = GuardedRuntimeClient::new(mock, errors);

        for _ in 0..5 {
            let _ = client.inspect("flaky").await;
        }
        assert_eq!(client.breaker().state(), crate::error_handling::CircuitState::Open);
        assert!(matches!(client.inspect("flaky").await, Err(RuntimeError::Transient(_))));
    }
}
