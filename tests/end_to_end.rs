//! End-to-end scenarios wiring the orchestrator, pipeline, report
//! generator and alert sender together the way `bin/monitor.rs` does,
//! covering the scenarios spec.md §8 names.

use std::sync::Arc;
use std::time::Duration;

use container_security_monitor::alert::AlertSender;
use container_security_monitor::config::MonitorConfig;
use container_security_monitor::orchestrator::MonitorOrchestrator;
use container_security_monitor::pipeline::{drain_loop, EventPipeline};
use container_security_monitor::report::{ReportAggregator, ReportFormat, ReportGenerator, Timeframe};
use container_security_monitor::runtime_client::mock::MockRuntimeClient;
use container_security_monitor::types::{ContainerDetail, ContainerSummary, MountPoint, PortBinding};
use container_security_monitor::Registry;

use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn privileged_root_container(id: &str, name: &str) -> ContainerDetail {
    ContainerDetail {
        id: id.to_string(),
        name: name.to_string(),
        image: "scratch".to_string(),
        user: "root".to_string(),
        privileged: true,
        cap_add: vec!["ALL".to_string()],
        cap_drop: Vec::new(),
        network_mode: "bridge".to_string(),
        exposed_ports: vec![PortBinding {
            container_port: 22,
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(22),
        }],
        security_opt: Vec::new(),
        memory_limit: 0,
        pids_limit: 0,
        mounts: vec![MountPoint {
            source: "/var/run/docker.sock".to_string(),
            destination: "/var/run/docker.sock".to_string(),
            mode: "rw".to_string(),
            writable: true,
            mount_type: "bind".to_string(),
        }],
    }
}

/// A privileged, root, ALL-capability container with the docker socket
/// mounted in produces a CRITICAL posture finding on the very first tick.
#[tokio::test]
async fn privileged_container_with_docker_socket_mount_is_flagged_critical() {
    let mock = Arc::new(MockRuntimeClient::new());
    mock.containers.lock().push(ContainerSummary {
        id: "c1".to_string(),
        name: "build-agent".to_string(),
        status: "running".to_string(),
    });
    mock.details
        .lock()
        .insert("c1".to_string(), privileged_root_container("c1", "build-agent"));

    let mut config = MonitorConfig::default();
    config.monitor_interval = 1;
    config.report_interval = 2;
    config.container_patterns = vec!["*".to_string()];

    let registry = Registry::for_tests();
    let metrics = registry.metrics.clone();
    let (pipeline, mut receiver) = EventPipeline::new(metrics);
    let orchestrator = Arc::new(MonitorOrchestrator::new(config, registry, mock, pipeline).unwrap());

    let run_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    orchestrator.shutdown();
    let _ = run_handle.await;

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }

    assert!(events
        .iter()
        .any(|e| e.severity == container_security_monitor::types::Severity::Critical
            && e.description.contains("privileged")));
    assert!(events
        .iter()
        .any(|e| e.severity == container_security_monitor::types::Severity::Critical
            && e.description.contains("Docker socket")));
}

/// A CRITICAL event reaching the drain loop is signed and delivered to the
/// alert webhook with a verifiable HMAC signature header.
#[tokio::test]
async fn critical_event_triggers_signed_webhook_delivery() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_exists("X-Hub-Signature-256"))
        .and(header_exists("X-Timestamp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = MonitorConfig::default();
    config.alert_webhook = Some(format!("http://{}/hook", mock_server.address()));
    config.alert_secret_key = "a-secret-key-that-is-at-least-32-bytes!!".to_string();

    let registry = Registry::for_tests();
    let (pipeline, receiver) = EventPipeline::new(registry.metrics.clone());
    let aggregator = Arc::new(ReportAggregator::new());
    let alert_sender = Arc::new(AlertSender::new(config, registry.errors.clone(), registry.metrics.clone()));

    let handle = tokio::spawn(drain_loop(pipeline.clone(), receiver, aggregator.clone(), alert_sender));

    let event = container_security_monitor::types::SecurityEvent::new(
        container_security_monitor::types::EventType::SecurityMisconfiguration,
        container_security_monitor::types::Severity::Critical,
        "posture_checker",
        "Container runs in privileged mode",
    )
    .with_container("c1", "build-agent");
    pipeline.offer(event);

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(aggregator.snapshot().len(), 1);
}

/// A full tick's events flow into the report generator and drive a
/// CRITICAL executive summary with the expected compliance scoring.
#[tokio::test]
async fn tick_events_drive_critical_report() {
    let mock = Arc::new(MockRuntimeClient::new());
    mock.containers.lock().push(ContainerSummary {
        id: "c1".to_string(),
        name: "legacy-service".to_string(),
        status: "running".to_string(),
    });
    mock.details
        .lock()
        .insert("c1".to_string(), privileged_root_container("c1", "legacy-service"));

    let mut config = MonitorConfig::default();
    config.monitor_interval = 1;
    config.report_interval = 2;

    let registry = Registry::for_tests();
    let (pipeline, receiver) = EventPipeline::new(registry.metrics.clone());
    let aggregator = Arc::new(ReportAggregator::new());
    let alert_sender = Arc::new(AlertSender::new(
        MonitorConfig::default(),
        registry.errors.clone(),
        registry.metrics.clone(),
    ));
    let drain_handle = tokio::spawn(drain_loop(pipeline.clone(), receiver, aggregator.clone(), alert_sender));

    let orchestrator = Arc::new(MonitorOrchestrator::new(config, registry, mock, pipeline).unwrap());
    let run_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    orchestrator.shutdown();
    let _ = run_handle.await;
    drain_handle.abort();

    let generator = ReportGenerator::new(aggregator);
    let report = generator.generate(Timeframe::TwentyFourHours, ReportFormat::Json, true);

    assert_eq!(report.executive_summary.status, "CRITICAL");
    assert_eq!(report.executive_summary.affected_containers, 1);
    assert!(report.compliance_status.scores["cis_docker"] < 100);
}

/// `EventPipeline::offer` drops events past queue capacity rather than
/// blocking the caller, recording `queue_full` instead.
#[tokio::test]
async fn pipeline_offer_does_not_block_when_full() {
    let registry = Registry::for_tests();
    let (pipeline, _receiver) = EventPipeline::new(registry.metrics.clone());

    let accepted = (0..2_000)
        .filter(|_| {
            pipeline.offer(container_security_monitor::types::SecurityEvent::new(
                container_security_monitor::types::EventType::ResourceAnomaly,
                container_security_monitor::types::Severity::Info,
                "test",
                "fill queue",
            ))
        })
        .count();

    assert!(accepted < 2_000);
    assert!(accepted > 0);
}
