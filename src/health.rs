//! Operational readiness surface (spec.md §6): three independent signals —
//! `startup_complete`, `ready`, `live`. Serving them over HTTP is an
//! external collaborator's job; this module only tracks the booleans.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Dependency-injected readiness tracker, one per [`crate::Registry`].
pub struct HealthState {
    startup_complete: AtomicBool,
    runtime_reachable: AtomicBool,
    executor_capacity: AtomicUsize,
    executor_in_use: AtomicUsize,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            startup_complete: AtomicBool::new(false),
            runtime_reachable: AtomicBool::new(false),
            executor_capacity: AtomicUsize::new(0),
            executor_in_use: AtomicUsize::new(0),
        }
    }

    pub fn mark_startup_complete(&self) {
        self.startup_complete.store(true, Ordering::SeqCst);
    }

    pub fn set_runtime_reachable(&self, reachable: bool) {
        self.runtime_reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_executor_capacity(&self, capacity: usize) {
        self.executor_capacity.store(capacity, Ordering::SeqCst);
    }

    pub fn set_executor_in_use(&self, in_use: usize) {
        self.executor_in_use.store(in_use, Ordering::SeqCst);
    }

    /// Initialization has finished.
    pub fn startup_complete(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }

    /// Runtime client reachable and the executor is not saturated.
    pub fn ready(&self) -> bool {
        self.runtime_reachable.load(Ordering::SeqCst)
            && self.executor_in_use.load(Ordering::SeqCst) < self.executor_capacity.load(Ordering::SeqCst).max(1)
    }

    /// Process is able to allocate and schedule — true once constructed,
    /// since reaching this code at all demonstrates that.
    pub fn live(&self) -> bool {
        true
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_runtime_reachable() {
        let health = HealthState::new();
        health.set_executor_capacity(10);
        assert!(!health.ready());
        health.set_runtime_reachable(true);
        assert!(health.ready());
    }

    #[test]
    fn not_ready_when_executor_saturated() {
        let health = HealthState::new();
        health.set_runtime_reachable(true);
        health.set_executor_capacity(5);
        health.set_executor_in_use(5);
        assert!(!health.ready());
    }

    #[test]
    fn live_is_always_true_once_constructed() {
        assert!(HealthState::new().live());
    }
}
