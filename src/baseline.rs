//! Per-container rolling statistics (spec.md §3 `ContainerBaseline`),
//! owned by a `BaselineStore` keyed by container id — analyzers hold only
//! references, never ownership (Design Notes §9: "Baselines are owned by
//! the store ... ensuring single ownership and simple lifetime rules").

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

const CPU_MEM_TRAFFIC_CAPACITY: usize = 50;
const PROCESS_CAPACITY: usize = 20;
const MIN_SAMPLES_FOR_AVERAGE: usize = 5;

/// A fixed-capacity FIFO ring buffer of `f64` samples.
#[derive(Debug, Clone, Default)]
pub struct RingBuffer {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average, or `None` if fewer than [`MIN_SAMPLES_FOR_AVERAGE`] samples
    /// have been recorded (spec.md §3 invariant).
    pub fn average(&self) -> Option<f64> {
        if self.samples.len() < MIN_SAMPLES_FOR_AVERAGE {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Trend over the last 10 samples: the last 5 vs the 5 before that.
    /// `Trend::InsufficientData` when fewer than 10 samples are available.
    pub fn trend(&self, increase_ratio: f64, decrease_ratio: f64) -> Trend {
        if self.samples.len() < 10 {
            return Trend::InsufficientData;
        }
        let recent: Vec<f64> = self.samples.iter().rev().take(5).copied().collect();
        let older: Vec<f64> = self.samples.iter().rev().skip(5).take(5).copied().collect();
        let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
        let older_avg = older.iter().sum::<f64>() / older.len() as f64;
        if older_avg == 0.0 {
            return Trend::Stable;
        }
        if recent_avg > older_avg * increase_ratio {
            Trend::Increasing
        } else if recent_avg < older_avg * decrease_ratio {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Count of the last `window` samples exceeding `threshold`.
    pub fn count_recent_exceeding(&self, window: usize, threshold: f64) -> usize {
        self.samples
            .iter()
            .rev()
            .take(window)
            .filter(|v| **v > threshold)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    /// Fewer than 10 samples recorded yet; distinct from `Stable` so callers
    /// don't read "no trend data" as "confirmed flat".
    InsufficientData,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        };
        write!(f, "{s}")
    }
}

/// Per-container rolling statistics and derived averages.
pub struct ContainerBaseline {
    pub container_id: String,
    pub container_name: String,
    pub established_at: DateTime<Utc>,

    pub cpu_history: RingBuffer,
    pub memory_history: RingBuffer,
    pub process_history: RingBuffer,
    pub rx_history: RingBuffer,
    pub tx_history: RingBuffer,

    pub anomaly_count: u64,
    pub last_anomaly_at: Option<DateTime<Utc>>,

    pub observed_peers: HashSet<String>,
    pub traffic_spike_count: u64,
    pub last_seen: DateTime<Utc>,

    /// Timestamps of synthetic connection-attempt events, purged to a
    /// rolling 5-minute window on every read (spec.md §4.3, §9: the
    /// scanning rule fires on a counter incremented once per analyzer
    /// tick rather than a real connection source — preserved literally).
    pub connection_attempts: VecDeque<DateTime<Utc>>,
}

impl ContainerBaseline {
    fn new(container_id: String, container_name: String) -> Self {
        let now = Utc::now();
        Self {
            container_id,
            container_name,
            established_at: now,
            cpu_history: RingBuffer::new(CPU_MEM_TRAFFIC_CAPACITY),
            memory_history: RingBuffer::new(CPU_MEM_TRAFFIC_CAPACITY),
            process_history: RingBuffer::new(PROCESS_CAPACITY),
            rx_history: RingBuffer::new(CPU_MEM_TRAFFIC_CAPACITY),
            tx_history: RingBuffer::new(CPU_MEM_TRAFFIC_CAPACITY),
            anomaly_count: 0,
            last_anomaly_at: None,
            observed_peers: HashSet::new(),
            traffic_spike_count: 0,
            last_seen: now,
            connection_attempts: VecDeque::new(),
        }
    }

    pub fn record_anomaly(&mut self) {
        self.anomaly_count += 1;
        self.last_anomaly_at = Some(Utc::now());
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Records one connection attempt now, purges entries older than 5
    /// minutes, and returns the count within the last 60 seconds.
    pub fn record_connection_attempt(&mut self) -> usize {
        let now = Utc::now();
        self.connection_attempts.push_back(now);
        let window_start = now - chrono::Duration::minutes(5);
        while self.connection_attempts.front().is_some_and(|t| *t < window_start) {
            self.connection_attempts.pop_front();
        }
        let one_minute_ago = now - chrono::Duration::seconds(60);
        self.connection_attempts.iter().filter(|t| **t >= one_minute_ago).count()
    }
}

/// Per-container baselines, keyed by container id. Concurrent updates to
/// different containers are independent (`DashMap` shards internally);
/// updates to the same container are serialized through its own `Mutex`
/// (spec.md §5 shared-resource policy).
pub struct BaselineStore {
    baselines: DashMap<String, Mutex<ContainerBaseline>>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self {
            baselines: DashMap::new(),
        }
    }

    /// Run `f` against the baseline for `container_id`, creating it lazily
    /// if this is the first observation.
    pub fn with_baseline<R>(
        &self,
        container_id: &str,
        container_name: &str,
        f: impl FnOnce(&mut ContainerBaseline) -> R,
    ) -> R {
        let entry = self.baselines.entry(container_id.to_string()).or_insert_with(|| {
            Mutex::new(ContainerBaseline::new(
                container_id.to_string(),
                container_name.to_string(),
            ))
        });
        let mut guard = entry.lock();
        guard.touch();
        f(&mut guard)
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    /// Evict baselines not observed within `max_age` (default 24h,
    /// spec.md §3 lifecycle).
    pub fn cleanup_older_than(&self, max_age: chrono::Duration) {
        let cutoff = Utc::now() - max_age;
        self.baselines.retain(|_, baseline| baseline.lock().last_seen > cutoff);
    }
}

impl Default for BaselineStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_never_exceeds_capacity() {
        let mut buffer = RingBuffer::new(50);
        for i in 0..200 {
            buffer.push(i as f64);
        }
        assert_eq!(buffer.len(), 50);
    }

    #[test]
    fn average_requires_minimum_samples() {
        let mut buffer = RingBuffer::new(50);
        for i in 0..4 {
            buffer.push(i as f64);
        }
        assert!(buffer.average().is_none());
        buffer.push(4.0);
        assert!(buffer.average().is_some());
    }

    #[test]
    fn trend_detects_increase_and_decrease() {
        let mut buffer = RingBuffer::new(50);
        for v in [20.0, 20.0, 20.0, 20.0, 20.0, 40.0, 40.0, 40.0, 40.0, 40.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.trend(1.2, 0.8), Trend::Increasing);
    }

    #[test]
    fn trend_is_insufficient_data_below_ten_samples() {
        let mut buffer = RingBuffer::new(50);
        for v in [20.0, 20.0, 20.0, 20.0, 20.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.trend(1.2, 0.8), Trend::InsufficientData);
    }

    #[test]
    fn store_creates_baseline_lazily_and_cleans_up() {
        let store = BaselineStore::new();
        assert!(store.is_empty());
        store.with_baseline("c1", "web", |b| b.cpu_history.push(10.0));
        assert_eq!(store.len(), 1);
        store.cleanup_older_than(chrono::Duration::hours(24));
        assert_eq!(store.len(), 1);
        store.cleanup_older_than(chrono::Duration::seconds(-1));
        assert_eq!(store.len(), 0);
    }
}
