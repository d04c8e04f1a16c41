//! The four analyzers (spec.md §4.2–§4.5), each taking a point-in-time
//! snapshot from the runtime client plus the container's rolling baseline
//! and returning zero or more [`crate::types::SecurityEvent`]s. Analyzers
//! never hold a baseline themselves — they borrow one from the
//! [`crate::baseline::BaselineStore`] for the duration of a single call,
//! per the Design Notes' single-ownership rule.
//!
//! The orchestrator never names a concrete analyzer: it builds a fixed
//! `Vec<Box<dyn Analyzer>>` once at startup from the feature toggles and
//! iterates it every tick, per SPEC_FULL's dynamic-dispatch design note.

use crate::types::{ContainerDetail, ProcessList, SecurityEvent, StatsSnapshot};

pub mod behavior;
pub mod filesystem;
pub mod network;
pub mod posture;

/// Everything a single container's analysis pass collected this tick. Not
/// every analyzer needs every field — a field missing because the runtime
/// call failed simply means the analyzers that depend on it produce no
/// events, rather than the orchestrator skipping the container outright.
pub struct AnalysisContext {
    pub container_id: String,
    pub container_name: String,
    pub stats: Option<StatsSnapshot>,
    pub processes: Option<ProcessList>,
    pub detail: Option<ContainerDetail>,
    pub monitor_interval: u64,
}

/// Common interface the orchestrator drives dynamically. Implementations
/// read whichever `AnalysisContext` fields they need and ignore the rest.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, ctx: &AnalysisContext) -> Vec<SecurityEvent>;
}
