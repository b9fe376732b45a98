use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use timesync_core::config::PowerConfig;
use timesync_scheduler::{host::PowerMonitor, SyncEvent};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Whether any mains or USB supply under `dir` reports `online = 1`.
///
/// Returns `None` when the directory lists no such supply (typical for
/// desktops and VMs). Callers should treat that as "on external power".
pub fn read_power_connected(dir: &Path) -> Option<bool> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), "power supply directory unreadable: {e}");
            return None;
        }
    };

    let mut seen = false;
    for entry in entries.flatten() {
        let path = entry.path();
        let kind = read_trimmed(&path.join("type"));
        if !matches!(kind.as_deref(), Some("Mains") | Some("USB")) {
            continue;
        }
        seen = true;
        if read_trimmed(&path.join("online")).as_deref() == Some("1") {
            return Some(true);
        }
    }
    seen.then_some(false)
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Polls sysfs and delivers `PowerChanged` on transitions only.
pub struct SysfsPowerMonitor {
    runtime: Handle,
    events: mpsc::Sender<SyncEvent>,
    supply_dir: PathBuf,
    interval: Duration,
    /// Last state the scheduler was told about; seeded from the store so a
    /// change while the daemon was down is reported on the first poll.
    last_known: Arc<AtomicBool>,
    watch: Option<JoinHandle<()>>,
}

impl SysfsPowerMonitor {
    pub fn new(
        runtime: Handle,
        events: mpsc::Sender<SyncEvent>,
        config: &PowerConfig,
        last_known: bool,
    ) -> Self {
        Self {
            runtime,
            events,
            supply_dir: PathBuf::from(&config.supply_dir),
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            last_known: Arc::new(AtomicBool::new(last_known)),
            watch: None,
        }
    }
}

impl PowerMonitor for SysfsPowerMonitor {
    fn enable_watch(&mut self) {
        if self.watch.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }
        let tx = self.events.clone();
        let dir = self.supply_dir.clone();
        let interval = self.interval;
        let last_known = Arc::clone(&self.last_known);

        info!(dir = %dir.display(), every_secs = interval.as_secs(), "watching power state");
        self.watch = Some(self.runtime.spawn(async move {
            loop {
                let connected = read_power_connected(&dir).unwrap_or(true);
                if connected != last_known.load(Ordering::SeqCst) {
                    last_known.store(connected, Ordering::SeqCst);
                    if tx.send(SyncEvent::PowerChanged { connected }).await.is_err() {
                        warn!("event queue closed; power change dropped");
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        }));
    }

    fn disable_watch(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.abort();
            debug!("power watch disabled");
        }
    }
}
