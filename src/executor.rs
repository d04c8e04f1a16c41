//! Bounded-concurrency per-container job runner (spec.md §4.6).
//!
//! Built on explicit `Arc`-wrapped shared state constructed once and
//! cloned into each spawned task; `tokio::sync::Semaphore` plus an
//! unbounded intake queue is the idiomatic tokio shape for "at most N
//! concurrent, unlimited backlog."

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ExecutorCounters {
    pub submitted: AtomicU64,
    pub running: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// Runs at most `max_concurrent` jobs at a time; excess submissions wait
/// on the semaphore rather than being rejected.
pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    counters: Arc<ExecutorCounters>,
    shutdown: CancellationToken,
    max_concurrent: usize,
}

impl BoundedExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            counters: Arc::new(ExecutorCounters::default()),
            shutdown: CancellationToken::new(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_use(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    pub fn counters(&self) -> Arc<ExecutorCounters> {
        self.counters.clone()
    }

    /// Submits `job` to run once a permit is available. Returns a handle
    /// the caller can await to observe completion; cancellation-aware —
    /// if shutdown is signaled before a permit is acquired, the job never
    /// starts and counts as neither completed nor failed.
    pub fn submit<F, Fut>(&self, job: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        let semaphore = self.semaphore.clone();
        let counters = self.counters.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = shutdown.cancelled() => return,
            };
            let Ok(_permit) = permit else { return };

            counters.running.fetch_add(1, Ordering::SeqCst);
            let result = job().await;
            counters.running.fetch_sub(1, Ordering::SeqCst);

            match result {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
    }

    /// Signals shutdown, then waits up to `grace_period` for running jobs
    /// to finish by polling the running counter.
    pub async fn shutdown(&self, grace_period: Duration) {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + grace_period;
        while self.counters.running.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn respects_max_concurrency() {
        let executor = BoundedExecutor::new(2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let concurrent = concurrent.clone();
            let max_seen = max_seen.clone();
            handles.push(executor.submit(move || async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.counters().completed.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_jobs() {
        let executor = BoundedExecutor::new(1);
        executor.submit(|| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        executor.shutdown(Duration::from_millis(200)).await;
        assert_eq!(executor.counters().running.load(Ordering::SeqCst), 0);
    }
}
