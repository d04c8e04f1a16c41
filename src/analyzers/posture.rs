//! Static container-configuration checks against policy.
//!
//! Grounded on `original_source/.../analyzers/posture.py`'s
//! `dangerous_capabilities`/`sensitive_directories` sets and check
//! ordering; thresholds and exact severities follow the expanded spec.

use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::types::{ContainerDetail, EventType, SecurityEvent, Severity};

const CRITICAL_CAPABILITIES: &[&str] = &["SYS_ADMIN", "SYS_MODULE"];
const CRITICAL_MOUNT_PREFIXES: &[&str] = &["/proc", "/sys"];
const DOCKER_SOCKET_MARKER: &str = "/var/run/docker.sock";

pub struct PostureChecker {
    config: Arc<MonitorConfig>,
}

impl PostureChecker {
    pub fn new(config: Arc<MonitorConfig>) -> Self {
        Self { config }
    }

    pub fn analyze(&self, container: &ContainerDetail) -> Vec<SecurityEvent> {
        let mut events = Vec::new();
        let id = container.id.as_str();
        let name = container.name.as_str();

        self.check_user(container, &mut events, id, name);
        self.check_privileged(container, &mut events, id, name);
        self.check_capabilities(container, &mut events, id, name);
        self.check_network_mode(container, &mut events, id, name);
        self.check_exposed_ports(container, &mut events, id, name);
        self.check_mounts(container, &mut events, id, name);
        self.check_security_opt(container, &mut events, id, name);
        self.check_resource_limits(container, &mut events, id, name);

        events
    }

    fn check_user(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        let user = container.user.trim();
        let runs_as_root = user.is_empty()
            || user == "0"
            || user.eq_ignore_ascii_case("root")
            || user.starts_with("0:")
            || user.ends_with(":0");
        if runs_as_root {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityMisconfiguration,
                    Severity::High,
                    "posture_checker",
                    "Container runs as root",
                )
                .with_container(id, name)
                .with_detail("user", container.user.clone()),
            );
        }
    }

    fn check_privileged(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        if container.privileged {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityMisconfiguration,
                    Severity::Critical,
                    "posture_checker",
                    "Container runs in privileged mode",
                )
                .with_container(id, name),
            );
        }
    }

    fn check_capabilities(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        if container.cap_add.iter().any(|c| c.eq_ignore_ascii_case("ALL")) {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityMisconfiguration,
                    Severity::Critical,
                    "posture_checker",
                    "Container adds ALL capabilities",
                )
                .with_container(id, name),
            );
        } else {
            for cap in &container.cap_add {
                if self.config.dangerous_capabilities.iter().any(|d| d.eq_ignore_ascii_case(cap)) {
                    let severity = if CRITICAL_CAPABILITIES.iter().any(|c| c.eq_ignore_ascii_case(cap)) {
                        Severity::Critical
                    } else {
                        Severity::High
                    };
                    events.push(
                        SecurityEvent::new(
                            EventType::SecurityMisconfiguration,
                            severity,
                            "posture_checker",
                            format!("Dangerous capability added: {cap}"),
                        )
                        .with_container(id, name)
                        .with_detail("capability", cap.clone()),
                    );
                }
            }
        }

        if container.cap_add.is_empty() && container.cap_drop.is_empty() {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityRecommendation,
                    Severity::Medium,
                    "posture_checker",
                    "No capabilities dropped; consider a least-privilege capability set",
                )
                .with_container(id, name),
            );
        }
    }

    fn check_network_mode(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        if container.network_mode == "host" {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityMisconfiguration,
                    Severity::High,
                    "posture_checker",
                    "Container uses host network mode",
                )
                .with_container(id, name),
            );
        }
    }

    fn check_exposed_ports(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        for port in &container.exposed_ports {
            if !self.config.allowed_ports.contains(&port.container_port) {
                events.push(
                    SecurityEvent::new(
                        EventType::NetworkSecurity,
                        Severity::Medium,
                        "posture_checker",
                        format!("Exposed port {} not in allowed_ports", port.container_port),
                    )
                    .with_container(id, name)
                    .with_detail("port", port.container_port),
                );
            }
            let host_ip_is_wildcard = match port.host_ip.as_deref() {
                None => true,
                Some(ip) => ip.is_empty() || ip == "0.0.0.0",
            };
            if host_ip_is_wildcard {
                events.push(
                    SecurityEvent::new(
                        EventType::NetworkSecurity,
                        Severity::Medium,
                        "posture_checker",
                        format!("Port {} bound to all interfaces", port.container_port),
                    )
                    .with_container(id, name)
                    .with_detail("port", port.container_port),
                );
            }
        }
    }

    fn check_mounts(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        for mount in &container.mounts {
            if mount.source.contains(DOCKER_SOCKET_MARKER) {
                events.push(
                    SecurityEvent::new(
                        EventType::SecurityMisconfiguration,
                        Severity::Critical,
                        "posture_checker",
                        "Docker socket mounted into container",
                    )
                    .with_container(id, name)
                    .with_detail("source", mount.source.clone()),
                );
                continue;
            }

            if let Some(prefix) = self
                .config
                .sensitive_directories
                .iter()
                .find(|dir| mount.source.starts_with(dir.as_str()))
            {
                let severity = if CRITICAL_MOUNT_PREFIXES.contains(&prefix.as_str()) {
                    Severity::Critical
                } else {
                    Severity::High
                };
                events.push(
                    SecurityEvent::new(
                        EventType::SecurityMisconfiguration,
                        severity,
                        "posture_checker",
                        format!("Sensitive host path mounted: {}", mount.source),
                    )
                    .with_container(id, name)
                    .with_detail("source", mount.source.clone()),
                );
            }

            let destination_under_etc_or_usr =
                mount.destination.starts_with("/etc") || mount.destination.starts_with("/usr");
            if mount.writable && destination_under_etc_or_usr {
                events.push(
                    SecurityEvent::new(
                        EventType::SecurityMisconfiguration,
                        Severity::High,
                        "posture_checker",
                        format!("Writable mount under {}", mount.destination),
                    )
                    .with_container(id, name)
                    .with_detail("destination", mount.destination.clone()),
                );
            }
        }
    }

    fn check_security_opt(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        let unconfined = container
            .security_opt
            .iter()
            .any(|opt| opt == "apparmor=unconfined" || opt == "seccomp=unconfined");
        if unconfined {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityMisconfiguration,
                    Severity::High,
                    "posture_checker",
                    "AppArmor or seccomp disabled",
                )
                .with_container(id, name),
            );
        }

        if !container.security_opt.iter().any(|opt| opt.contains("no-new-privileges")) {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityRecommendation,
                    Severity::Medium,
                    "posture_checker",
                    "no-new-privileges is not set",
                )
                .with_container(id, name),
            );
        }
    }

    fn check_resource_limits(&self, container: &ContainerDetail, events: &mut Vec<SecurityEvent>, id: &str, name: &str) {
        if container.memory_limit == 0 {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityRecommendation,
                    Severity::Medium,
                    "posture_checker",
                    "No memory limit set",
                )
                .with_container(id, name),
            );
        }
        if container.pids_limit <= 0 {
            events.push(
                SecurityEvent::new(
                    EventType::SecurityRecommendation,
                    Severity::Low,
                    "posture_checker",
                    "No PID limit set",
                )
                .with_container(id, name),
            );
        }
    }
}

impl crate::analyzers::Analyzer for PostureChecker {
    fn analyze(&self, ctx: &crate::analyzers::AnalysisContext) -> Vec<SecurityEvent> {
        match &ctx.detail {
            Some(detail) => self.analyze(detail),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_container() -> ContainerDetail {
        ContainerDetail {
            id: "c1".to_string(),
            name: "web".to_string(),
            image: "nginx".to_string(),
            user: "appuser".to_string(),
            privileged: false,
            cap_add: Vec::new(),
            cap_drop: vec!["ALL".to_string()],
            network_mode: "bridge".to_string(),
            exposed_ports: Vec::new(),
            security_opt: vec!["no-new-privileges:true".to_string()],
            memory_limit: 512 * 1024 * 1024,
            pids_limit: 100,
            mounts: Vec::new(),
        }
    }

    #[test]
    fn privileged_and_root_both_fire() {
        let config = MonitorConfig::default();
        let checker = PostureChecker::new(Arc::new(config));
        let mut container = base_container();
        container.user = "root".to_string();
        container.privileged = true;

        let events = checker.analyze(&container);
        assert!(events
            .iter()
            .any(|e| e.severity == Severity::High && e.description.contains("root")));
        assert!(events
            .iter()
            .any(|e| e.severity == Severity::Critical && e.description.contains("privileged")));
    }

    #[test]
    fn docker_socket_mount_is_critical() {
        let config = MonitorConfig::default();
        let checker = PostureChecker::new(Arc::new(config));
        let mut container = base_container();
        container.mounts.push(crate::types::MountPoint {
            source: "/var/run/docker.sock".to_string(),
            destination: "/var/run/docker.sock".to_string(),
            mode: "rw".to_string(),
            writable: true,
            mount_type: "bind".to_string(),
        });

        let events = checker.analyze(&container);
        assert!(events
            .iter()
            .any(|e| e.severity == Severity::Critical && e.description.contains("Docker socket")));
    }

    #[test]
    fn clean_container_has_no_findings() {
        let config = MonitorConfig::default();
        let checker = PostureChecker::new(Arc::new(config));
        let events = checker.analyze(&base_container());
        assert!(events.is_empty());
    }
}
