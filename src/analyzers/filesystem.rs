//! Debounced recursive directory watcher over `monitored_directories`.
//!
//! Grounded on `original_source/.../src/security_monitor.py`'s
//! `_handle_file_change` (the noisy-pattern ignore list and the
//! security-sensitive-file severity bump), forwarding events over the
//! same channel-based pattern used for every other async loop in this
//! crate; the watcher itself uses the `notify` crate, the
//! ecosystem-standard choice for filesystem events in Rust.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::{EventType, SecurityEvent, Severity};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

const SECURITY_FILES: &[&str] = &["/etc/passwd", "/etc/shadow", "/etc/sudoers", "/etc/hosts"];
const NOISY_PATTERNS: &[&str] = &[".tmp", ".log", ".cache", "proc/"];

/// Classifies a changed path into an event, or `None` if it matches a
/// noisy pattern and should be ignored entirely.
pub fn classify_change(path: &Path) -> Option<SecurityEvent> {
    let path_str = path.to_string_lossy();

    if NOISY_PATTERNS.iter().any(|pattern| path_str.contains(pattern)) {
        return None;
    }

    let severity = if SECURITY_FILES.iter().any(|f| path_str.contains(f)) {
        Severity::High
    } else {
        Severity::Medium
    };

    Some(
        SecurityEvent::new(
            EventType::FileSystemChange,
            severity,
            "filesystem_watcher",
            format!("File system change detected: {path_str}"),
        )
        .with_detail("path", path_str.to_string()),
    )
}

/// Owns the `notify` watcher and a debounce table keyed by path. Runs as a
/// background task forwarding coalesced events to the event pipeline.
pub struct FilesystemWatcher {
    _watcher: RecommendedWatcher,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl FilesystemWatcher {
    /// Starts watching every directory in `paths` recursively.
    pub fn start(paths: &[String]) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })?;

        for path in paths {
            let path = PathBuf::from(path);
            if path.exists() {
                watcher.watch(&path, RecursiveMode::Recursive)?;
            } else {
                tracing::warn!(path = %path.display(), "monitored directory does not exist, skipping");
            }
        }

        Ok(Self {
            _watcher: watcher,
            receiver: Mutex::new(Some(rx)),
        })
    }

    /// Runs the debounce-and-classify loop until the channel closes,
    /// offering every resulting event to `sink`.
    pub async fn run(&self, sink: Arc<crate::pipeline::EventPipeline>) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };

        let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();
        let mut flush = tokio::time::interval(DEBOUNCE_WINDOW);

        loop {
            tokio::select! {
                event = receiver.recv() => {
                    let Some(event) = event else { break };
                    for path in event.paths {
                        pending.insert(path, tokio::time::Instant::now() + DEBOUNCE_WINDOW);
                    }
                }
                _ = flush.tick() => {
                    let now = tokio::time::Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        if let Some(security_event) = classify_change(&path) {
                            sink.offer(security_event);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noisy_patterns_are_ignored() {
        assert!(classify_change(Path::new("/var/log/app.log")).is_none());
        assert!(classify_change(Path::new("/tmp/foo.tmp")).is_none());
        assert!(classify_change(Path::new("/proc/1/status")).is_none());
    }

    #[test]
    fn security_sensitive_file_is_high_severity() {
        let event = classify_change(Path::new("/etc/shadow")).unwrap();
        assert_eq!(event.severity, Severity::High);
    }

    #[test]
    fn ordinary_change_is_medium_severity() {
        let event = classify_change(Path::new("/etc/myapp.conf")).unwrap();
        assert_eq!(event.severity, Severity::Medium);
    }
}
