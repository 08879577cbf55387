use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;

type LinkLostCallback = Box<dyn Fn() + Send + Sync>;

/// Watches the kernel's operstate for an interface and reports link loss.
pub struct LinkMonitor {
    operstate_path: PathBuf,
    period: Duration,
    on_link_lost: Option<LinkLostCallback>,
}

impl LinkMonitor {
    pub fn new(interface: &str, period: Duration) -> LinkMonitor {
        LinkMonitor::with_path(format!("/sys/class/net/{interface}/operstate"), period)
    }

    pub fn with_path(operstate_path: impl Into<PathBuf>, period: Duration) -> LinkMonitor {
        LinkMonitor {
            operstate_path: operstate_path.into(),
            period,
            on_link_lost: None,
        }
    }

    /// Registers the link-loss callback. It fires once per up -> down
    /// transition, on a runtime worker thread.
    pub fn on_link_lost(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_link_lost = Some(Box::new(callback));
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.period);
        let mut tracker = LinkTracker::default();

        loop {
            ticker.tick().await;

            let up = match tokio::fs::read_to_string(&self.operstate_path).await {
                Ok(state) => state.trim() == "up",
                Err(e) => {
                    log::debug!("Failed to read {}: {e}", self.operstate_path.display());
                    false
                }
            };

            if tracker.observe(up) {
                if let Some(callback) = &self.on_link_lost {
                    callback();
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct LinkTracker {
    was_up: bool,
}

impl LinkTracker {
    /// Returns true when this sample is a loss of a previously-up link.
    fn observe(&mut self, up: bool) -> bool {
        let lost = self.was_up && !up;
        self.was_up = up;
        lost
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_tracker_reports_each_loss_once() {
        let mut tracker = LinkTracker::default();
        let samples = [false, true, true, false, false, true, false];
        let losses: Vec<bool> = samples.iter().map(|&up| tracker.observe(up)).collect();

        assert_eq!(
            losses,
            [false, false, false, true, false, false, true]
        );
    }

    #[tokio::test]
    async fn test_monitor_fires_callback_on_operstate_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operstate");
        std::fs::write(&path, "up\n").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let mut monitor = LinkMonitor::with_path(path.clone(), Duration::from_millis(10));
        let counter = Arc::clone(&fired);
        monitor.on_link_lost(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let task = monitor.spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        std::fs::write(&path, "down\n").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        task.abort();
    }
}
