//! Binary entry point: wires configuration, registry, and orchestrator
//! together and runs until a shutdown signal arrives (spec.md §6 exit
//! codes: `0` clean shutdown, `1` configuration error, `2` runtime
//! unavailable at startup).

use std::sync::Arc;

use container_security_monitor::alert::AlertSender;
use container_security_monitor::config::ConfigLoader;
use container_security_monitor::orchestrator::{spawn_filesystem_watcher, MonitorOrchestrator};
use container_security_monitor::pipeline::{drain_loop, EventPipeline};
use container_security_monitor::report::{ReportAggregator, ReportGenerator};
use container_security_monitor::runtime_client::{DockerRuntimeClient, GuardedRuntimeClient, RuntimeClient};
use container_security_monitor::Registry;

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let loader = ConfigLoader::new(config_path);
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let registry = Registry::new(&config);
    registry.logger.info(
        container_security_monitor::logging::LogCategory::Scheduler,
        "starting container security monitor",
    );

    let docker_host = std::env::var("MONITOR_DOCKER_HOST").unwrap_or_else(|_| "http://localhost:2375".to_string());
    let inner_runtime: Arc<dyn RuntimeClient> = Arc::new(DockerRuntimeClient::new(docker_host));
    let runtime: Arc<dyn RuntimeClient> = Arc::new(GuardedRuntimeClient::new(inner_runtime, registry.errors.clone()));

    if let Err(e) = runtime.list().await {
        eprintln!("runtime unavailable at startup: {e}");
        std::process::exit(2);
    }

    let (pipeline, receiver) = EventPipeline::new(registry.metrics.clone());
    let aggregator = Arc::new(ReportAggregator::new());
    let report_generator = Arc::new(ReportGenerator::new(aggregator.clone()));
    let alert_sender = Arc::new(AlertSender::new(config.clone(), registry.errors.clone(), registry.metrics.clone()));

    let drain_handle = tokio::spawn(drain_loop(pipeline.clone(), receiver, aggregator.clone(), alert_sender));

    let watcher_handle = spawn_filesystem_watcher(&config, pipeline.clone());
    let metrics_pipeline = pipeline.clone();

    let orchestrator = match MonitorOrchestrator::new(config, registry.clone(), runtime, pipeline) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let run_orchestrator = orchestrator.clone();
    let run_handle = tokio::spawn(async move { run_orchestrator.run().await });

    let report_orchestrator = orchestrator.clone();
    let report_handle = tokio::spawn(async move { report_orchestrator.report_loop(report_generator).await });

    let metrics_orchestrator = orchestrator.clone();
    let metrics_handle = tokio::spawn(async move { metrics_orchestrator.metrics_loop(metrics_pipeline).await });

    if tokio::signal::ctrl_c().await.is_ok() {
        registry.logger.info(
            container_security_monitor::logging::LogCategory::Scheduler,
            "shutdown signal received",
        );
    }

    orchestrator.shutdown();
    let _ = run_handle.await;
    let _ = report_handle.await;
    let _ = metrics_handle.await;

    if let Some((handle, stop_tx)) = watcher_handle {
        let _ = stop_tx.send(()).await;
        let _ = handle.await;
    }

    drain_handle.abort();
    registry.logger.info(
        container_security_monitor::logging::LogCategory::Scheduler,
        "monitor stopped cleanly",
    );
}
