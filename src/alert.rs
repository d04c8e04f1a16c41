//! HMAC-signed webhook delivery with retry/backoff and a rolling rate
//! limit (spec.md §4.8).
//!
//! Follows the retry-around-a-fallible-send shape used elsewhere for
//! transport delivery, generalized from TCP to HTTP over the declared
//! `reqwest` dependency, and reuses [`crate::error_handling::RetryConfig`]
//! for the exact 100ms/400ms/1.6s backoff sequence.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::MonitorConfig;
use crate::error_handling::{ErrorHandler, RetryConfig};
use crate::metrics::MetricsRegistry;
use crate::types::SecurityEvent;

type HmacSha256 = Hmac<Sha256>;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct AlertEnvelope {
    timestamp: String,
    event: SecurityEvent,
    payload_hash: String,
}

/// Tracks sends in the last rolling 60s window to enforce
/// `alert_rate_limit`.
struct RateLimiter {
    limit: u32,
    sent_at: VecDeque<std::time::Instant>,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            sent_at: VecDeque::new(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = std::time::Instant::now();
        while self
            .sent_at
            .front()
            .is_some_and(|t| now.duration_since(*t) > RATE_LIMIT_WINDOW)
        {
            self.sent_at.pop_front();
        }
        if self.sent_at.len() as u32 >= self.limit {
            return false;
        }
        self.sent_at.push_back(now);
        true
    }
}

/// Delivers security events to `alert_webhook` as signed JSON POSTs.
pub struct AlertSender {
    client: reqwest::Client,
    config: MonitorConfig,
    retry: RetryConfig,
    errors: Arc<ErrorHandler>,
    metrics: Arc<MetricsRegistry>,
    rate_limiter: Mutex<RateLimiter>,
}

impl AlertSender {
    pub fn new(config: MonitorConfig, errors: Arc<ErrorHandler>, metrics: Arc<MetricsRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.alert_timeout())
            .build()
            .expect("reqwest client builder never fails with these settings");
        let rate_limiter = Mutex::new(RateLimiter::new(config.alert_rate_limit));
        Self {
            client,
            config,
            retry: RetryConfig::default(),
            errors,
            metrics,
            rate_limiter,
        }
    }

    /// Attempts delivery. Never panics or propagates failure — callers
    /// fire this from a detached task per spec.md §4.7's ordering note.
    pub async fn send(&self, event: SecurityEvent) {
        let Some(webhook) = self.config.alert_webhook.clone() else {
            return;
        };

        if !self.rate_limiter.lock().try_acquire() {
            self.metrics.alert_rate_limited();
            return;
        }

        let envelope = build_envelope(&event);
        let canonical = match canonical_json(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.errors.record("alert_sender", "serialization");
                tracing::error!(error = %e, "failed to serialize alert envelope");
                return;
            }
        };

        let signature = sign(&canonical, self.config.alert_secret_key.as_bytes());

        for attempt in 0..=self.retry.max_retries {
            match self.attempt_delivery(&webhook, &canonical, &signature, &envelope.timestamp).await {
                Ok(DeliveryOutcome::Success) => {
                    self.metrics.alert_sent("webhook");
                    return;
                }
                Ok(DeliveryOutcome::ClientError(status)) => {
                    self.errors.record("alert_sender", "client_error");
                    tracing::warn!(status, "alert webhook rejected payload, not retrying");
                    self.metrics.alert_failed("webhook");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "alert delivery attempt failed");
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        self.errors.record("alert_sender", "delivery_failed");
        self.metrics.alert_failed("webhook");
    }

    async fn attempt_delivery(
        &self,
        webhook: &str,
        canonical: &[u8],
        signature: &str,
        timestamp: &str,
    ) -> Result<DeliveryOutcome, String> {
        let response = self
            .client
            .post(webhook)
            .header("Content-Type", "application/json")
            .header("X-Timestamp", timestamp)
            .header("X-Hub-Signature-256", format!("sha256={signature}"))
            .body(canonical.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(DeliveryOutcome::Success)
        } else if status.is_client_error() {
            Ok(DeliveryOutcome::ClientError(status.as_u16()))
        } else {
            Err(format!("server error: {status}"))
        }
    }
}

enum DeliveryOutcome {
    Success,
    ClientError(u16),
}

fn build_envelope(event: &SecurityEvent) -> AlertEnvelope {
    let event_json = serde_json::to_vec(event).unwrap_or_default();
    let payload_hash = to_hex(&Sha256::digest(&event_json));
    AlertEnvelope {
        timestamp: chrono::Utc::now().to_rfc3339(),
        event: event.clone(),
        payload_hash,
    }
}

/// Deterministic JSON with sorted keys, required so the HMAC signature is
/// reproducible independent of field insertion order.
fn canonical_json(envelope: &AlertEnvelope) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(envelope)?;
    let sorted = sort_json_keys(value);
    serde_json::to_vec(&sorted)
}

fn sort_json_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_json_keys(map[key].clone()));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.into_iter().map(sort_json_keys).collect()),
        other => other,
    }
}

fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    to_hex(&mac.finalize().into_bytes())
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, Severity};

    #[test]
    fn signature_is_deterministic_for_identical_payloads() {
        let event = SecurityEvent::new(EventType::ResourceAnomaly, Severity::High, "test", "desc");
        let envelope_a = build_envelope(&event);
        let envelope_b = AlertEnvelope {
            timestamp: envelope_a.timestamp.clone(),
            ..build_envelope(&event)
        };
        let canonical_a = canonical_json(&envelope_a).unwrap();
        let canonical_b = canonical_json(&envelope_b).unwrap();
        let secret = b"a-secret-key-that-is-at-least-32-bytes!!";
        assert_eq!(sign(&canonical_a, secret), sign(&canonical_b, secret));
    }

    #[test]
    fn rate_limiter_blocks_after_limit() {
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
