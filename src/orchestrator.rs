//! Top-level scheduler owning every subsystem's lifecycle (spec.md §4.10).
//!
//! Follows a construct-then-spawn-background-loops shape, generalized
//! from a single connection loop to the four cooperating loops spec.md
//! names.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::analyzers::behavior::BehaviorAnalyzer;
use crate::analyzers::filesystem::FilesystemWatcher;
use crate::analyzers::network::NetworkAnalyzer;
use crate::analyzers::posture::PostureChecker;
use crate::analyzers::{AnalysisContext, Analyzer};
use crate::baseline::BaselineStore;
use crate::config::MonitorConfig;
use crate::executor::BoundedExecutor;
use crate::pipeline::EventPipeline;
use crate::report::{ReportAggregator, ReportGenerator};
use crate::runtime_client::RuntimeClient;
use crate::{MonitorError, Registry, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    Init = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl MonitorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MonitorState::Running,
            2 => MonitorState::Draining,
            3 => MonitorState::Stopped,
            _ => MonitorState::Init,
        }
    }
}

const EXECUTOR_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);
const METRICS_LOOP_INTERVAL: Duration = Duration::from_secs(15);

pub struct MonitorOrchestrator {
    config: Arc<MonitorConfig>,
    registry: Registry,
    runtime: Arc<dyn RuntimeClient>,
    baselines: Arc<BaselineStore>,
    pipeline: Arc<EventPipeline>,
    executor: Arc<BoundedExecutor>,
    patterns: Vec<Pattern>,
    analyzers: Arc<Vec<Box<dyn Analyzer>>>,
    state: AtomicU8,
    shutdown: CancellationToken,
}

impl MonitorOrchestrator {
    pub fn new(
        config: MonitorConfig,
        registry: Registry,
        runtime: Arc<dyn RuntimeClient>,
        pipeline: Arc<EventPipeline>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let patterns = config
            .container_patterns
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| MonitorError::Configuration(format!("invalid glob pattern {p}: {e}"))))
            .collect::<Result<Vec<_>>>()?;

        let executor = Arc::new(BoundedExecutor::new(config.max_concurrent_containers));
        registry.health.set_executor_capacity(executor.max_concurrent());

        let baselines = Arc::new(BaselineStore::new());

        // Built once from the feature toggles; the tick loop iterates this
        // fixed slice instead of naming a concrete analyzer.
        let mut analyzers: Vec<Box<dyn Analyzer>> = Vec::new();
        if config.behavioral_analysis || config.process_monitoring {
            analyzers.push(Box::new(BehaviorAnalyzer::new(config.clone(), baselines.clone())));
        }
        if config.network_monitoring {
            analyzers.push(Box::new(NetworkAnalyzer::new(config.clone(), baselines.clone())));
        }
        analyzers.push(Box::new(PostureChecker::new(config.clone())));

        Ok(Self {
            config,
            registry,
            runtime,
            baselines,
            pipeline,
            executor,
            patterns,
            analyzers: Arc::new(analyzers),
            state: AtomicU8::new(MonitorState::Init as u8),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: MonitorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn matches_patterns(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }

    /// Runs `monitor_loop` until `shutdown()` is called or cancellation
    /// fires. Only ticks while in `Running`.
    pub async fn run(&self) -> Result<()> {
        self.set_state(MonitorState::Running);
        self.registry.health.mark_startup_complete();
        self.registry.logger.info(crate::logging::LogCategory::Scheduler, "monitor orchestrator started");

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.monitor_interval));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state() == MonitorState::Running {
                        self.tick().await;
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.set_state(MonitorState::Draining);
        self.executor.shutdown(EXECUTOR_SHUTDOWN_GRACE_PERIOD).await;
        self.set_state(MonitorState::Stopped);
        self.registry.logger.info(crate::logging::LogCategory::Scheduler, "monitor orchestrator stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Generates and logs a summary report every `report_interval`, per
    /// spec.md §6: "Reports are served on demand by the Report Generator
    /// and periodically logged by the Orchestrator every report_interval."
    /// Runs alongside `run()` until shutdown is signaled.
    pub async fn report_loop(&self, report_generator: Arc<ReportGenerator>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.report_interval));
        ticker.tick().await; // first tick fires immediately; skip it so a report is due after one full interval.
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = report_generator.generate(
                        crate::report::Timeframe::TwentyFourHours,
                        crate::report::ReportFormat::Summary,
                        false,
                    );
                    self.registry.logger.audit(
                        crate::logging::LogCategory::Report,
                        "periodic security report",
                        serde_json::json!({
                            "status": report.executive_summary.status,
                            "risk_score": report.executive_summary.risk_score,
                            "total_events": report.metadata.total_events,
                            "posture_score": report.security_posture.posture_score,
                            "threat_level": report.threat_analysis.threat_level,
                        }),
                    );
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
    }

    /// Pushes gauge metrics not already emitted inline by a tick (executor
    /// utilization, baseline store size, retention buffer depth), on a
    /// fixed cadence independent of `monitor_interval`.
    pub async fn metrics_loop(&self, pipeline: Arc<EventPipeline>) {
        let mut ticker = tokio::time::interval(METRICS_LOOP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.registry.metrics.executor_running(self.executor.in_use() as u64);
                    self.registry.metrics.retention_buffer_size(pipeline.retention_len() as u64);
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
    }

    async fn tick(&self) {
        let _timer = crate::logging::PerformanceTimer::start(
            self.registry.logger.clone(),
            crate::logging::LogCategory::Scheduler,
            "monitor_tick",
        );

        let containers = match self.runtime.list().await {
            Ok(containers) => {
                self.registry.health.set_runtime_reachable(true);
                containers
            }
            Err(e) => {
                self.registry.health.set_runtime_reachable(false);
                self.registry.errors.record("orchestrator", "list_failed");
                tracing::warn!(error = %e, "failed to list containers this tick");
                return;
            }
        };

        let matching: Vec<_> = containers.into_iter().filter(|c| self.matches_patterns(&c.name)).collect();
        self.registry.metrics.containers_monitored(matching.len() as u64);

        let mut handles = Vec::with_capacity(matching.len());
        for container in matching {
            let runtime = self.runtime.clone();
            let pipeline = self.pipeline.clone();
            let config = self.config.clone();
            let analyzers = self.analyzers.clone();
            let errors = self.registry.errors.clone();

            handles.push(self.executor.submit(move || async move {
                analyze_container(runtime, analyzers, pipeline, config, errors, container.id, container.name).await;
                Ok(())
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.registry.health.set_executor_in_use(self.executor.in_use());
        self.baselines.cleanup_older_than(self.config.baseline_max_age());
    }
}

async fn analyze_container(
    runtime: Arc<dyn RuntimeClient>,
    analyzers: Arc<Vec<Box<dyn Analyzer>>>,
    pipeline: Arc<EventPipeline>,
    config: Arc<MonitorConfig>,
    errors: Arc<crate::error_handling::ErrorHandler>,
    container_id: String,
    container_name: String,
) {
    let (stats, processes, detail) = tokio::join!(
        runtime.stats(&container_id),
        runtime.processes(&container_id),
        runtime.inspect(&container_id),
    );

    let mut events = Vec::new();
    let mut ctx = AnalysisContext {
        container_id: container_id.clone(),
        container_name: container_name.clone(),
        stats: None,
        processes: None,
        detail: None,
        monitor_interval: config.monitor_interval,
    };

    match stats {
        Ok(stats) => ctx.stats = Some(stats),
        Err(crate::runtime_client::RuntimeError::NotFound(_)) => {}
        Err(e) => {
            errors.record("behavior_analyzer", "stats_unavailable");
            events.push(
                crate::types::SecurityEvent::new(
                    crate::types::EventType::AnalysisError,
                    crate::types::Severity::Low,
                    "behavior_analyzer",
                    format!("stats unavailable: {e}"),
                )
                .with_container(&container_id, &container_name),
            );
        }
    }

    if config.process_monitoring {
        match processes {
            Ok(processes) => ctx.processes = Some(processes),
            Err(crate::runtime_client::RuntimeError::NotFound(_)) => {}
            Err(e) => {
                errors.record("behavior_analyzer", "processes_unavailable");
                events.push(
                    crate::types::SecurityEvent::new(
                        crate::types::EventType::AnalysisError,
                        crate::types::Severity::Low,
                        "behavior_analyzer",
                        format!("processes unavailable: {e}"),
                    )
                    .with_container(&container_id, &container_name),
                );
            }
        }
    }

    match detail {
        Ok(detail) => ctx.detail = Some(detail),
        Err(crate::runtime_client::RuntimeError::NotFound(_)) => {}
        Err(e) => {
            errors.record("posture_checker", "inspect_unavailable");
            events.push(
                crate::types::SecurityEvent::new(
                    crate::types::EventType::PostureCheckError,
                    crate::types::Severity::Low,
                    "posture_checker",
                    format!("inspect unavailable: {e}"),
                )
                .with_container(&container_id, &container_name),
            );
        }
    }

    for analyzer in analyzers.iter() {
        events.extend(analyzer.analyze(&ctx));
    }

    for event in events {
        pipeline.offer(event);
    }
}

/// Spawns the filesystem watcher loop if enabled, returning its join
/// handle plus a channel the caller can use to stop it early.
pub fn spawn_filesystem_watcher(
    config: &MonitorConfig,
    pipeline: Arc<EventPipeline>,
) -> Option<(tokio::task::JoinHandle<()>, mpsc::Sender<()>)> {
    if !config.file_monitoring {
        return None;
    }
    let watcher = match FilesystemWatcher::start(&config.monitored_directories) {
        Ok(watcher) => Arc::new(watcher),
        Err(e) => {
            tracing::error!(error = %e, "failed to start filesystem watcher");
            return None;
        }
    };
    let (stop_tx, mut stop_rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = watcher.run(pipeline) => {}
            _ = stop_rx.recv() => {}
        }
    });
    Some((handle, stop_tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_client::mock::MockRuntimeClient;
    use crate::types::{ContainerDetail, ContainerSummary};

    #[tokio::test]
    async fn tick_filters_containers_by_glob_pattern() {
        let mock = Arc::new(MockRuntimeClient::new());
        mock.containers.lock().push(ContainerSummary {
            id: "c1".to_string(),
            name: "web-1".to_string(),
            status: "running".to_string(),
        });
        mock.containers.lock().push(ContainerSummary {
            id: "c2".to_string(),
            name: "db-1".to_string(),
            status: "running".to_string(),
        });
        mock.details.lock().insert(
            "c1".to_string(),
            ContainerDetail {
                id: "c1".to_string(),
                name: "web-1".to_string(),
                image: "nginx".to_string(),
                user: "root".to_string(),
                privileged: false,
                cap_add: Vec::new(),
                cap_drop: vec!["ALL".to_string()],
                network_mode: "bridge".to_string(),
                exposed_ports: Vec::new(),
                security_opt: vec!["no-new-privileges:true".to_string()],
                memory_limit: 1024,
                pids_limit: 10,
                mounts: Vec::new(),
            },
        );

        let mut config = MonitorConfig::default();
        config.container_patterns = vec!["web-*".to_string()];
        config.monitor_interval = 1;
        config.report_interval = 2;

        let registry = Registry::for_tests();
        let metrics = registry.metrics.clone();
        let (pipeline, mut receiver) = EventPipeline::new(metrics);
        let orchestrator = MonitorOrchestrator::new(config, registry, mock, pipeline).unwrap();

        orchestrator.tick().await;

        let mut container_ids = std::collections::HashSet::new();
        while let Ok(event) = receiver.try_recv() {
            container_ids.insert(event.container_id);
        }
        assert!(container_ids.contains("c1"));
        assert!(!container_ids.contains("c2"));
    }
}
