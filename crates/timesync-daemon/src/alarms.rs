use std::collections::HashMap;

use chrono::{DateTime, Utc};
use timesync_core::WakeMode;
use timesync_scheduler::{host::AlarmScheduler, SyncEvent};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

/// In-process alarms: one sleeping tokio task per armed listener.
///
/// Timers run on the monotonic clock; a suspended host fires overdue timers
/// on resume.
pub struct TokioAlarmScheduler {
    runtime: Handle,
    events: mpsc::Sender<SyncEvent>,
    inexact_window_secs: u64,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TokioAlarmScheduler {
    pub fn new(runtime: Handle, events: mpsc::Sender<SyncEvent>, inexact_window_secs: u64) -> Self {
        Self {
            runtime,
            events,
            inexact_window_secs,
            tasks: HashMap::new(),
        }
    }

    /// Timers armed and not yet fired.
    pub fn live(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_finished()).count()
    }
}

/// Round `at` up to the next multiple of `window_secs` since the epoch so
/// inexact timers across listeners fire together.
pub fn coalesce(at: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    let Ok(window) = i64::try_from(window_secs) else {
        return at;
    };
    if window <= 1 {
        return at;
    }
    let secs = at.timestamp();
    let rem = secs.rem_euclid(window);
    if rem == 0 && at.timestamp_subsec_nanos() == 0 {
        return at;
    }
    DateTime::from_timestamp(secs - rem + window, 0).unwrap_or(at)
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn arm(&mut self, id: &str, at: DateTime<Utc>, mode: WakeMode) {
        self.cancel(id);

        let deadline = match mode {
            WakeMode::Exact => at,
            WakeMode::Inexact => coalesce(at, self.inexact_window_secs),
        };
        let delay = (deadline - Utc::now()).to_std().unwrap_or_default();
        let tx = self.events.clone();
        let name = id.to_string();

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(listener = %name, "alarm fired");
            if tx.send(SyncEvent::Sync { name: name.clone() }).await.is_err() {
                warn!(listener = %name, "event queue closed; alarm dropped");
            }
        });
        self.tasks.insert(id.to_string(), task);
        debug!(
            listener = %id,
            deadline = %deadline,
            wake = %mode,
            delay_ms = delay.as_millis() as u64,
            live = self.live(),
            "timer scheduled"
        );
    }

    fn cancel(&mut self, id: &str) {
        if let Some(task) = self.tasks.remove(id) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::time::Duration as StdDuration;

    #[test]
    fn coalesce_rounds_up_to_window() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 17).unwrap();
        assert_eq!(coalesce(at, 60), Utc.with_ymd_and_hms(2026, 1, 1, 10, 1, 0).unwrap());
        assert_eq!(coalesce(at, 0), at);
        assert_eq!(coalesce(at, 1), at);
    }

    #[test]
    fn coalesce_keeps_aligned_instants() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap();
        assert_eq!(coalesce(at, 300), at);
        let nudged = at + Duration::milliseconds(1);
        assert_eq!(coalesce(nudged, 300), at + Duration::minutes(5));
    }

    #[tokio::test]
    async fn past_deadline_fires_immediately() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut alarms = TokioAlarmScheduler::new(Handle::current(), tx, 60);
        alarms.arm("now", Utc::now() - Duration::seconds(5), WakeMode::Exact);

        let event = tokio::time::timeout(StdDuration::from_secs(2), rx.recv())
            .await
            .expect("alarm did not fire");
        assert_eq!(event, Some(SyncEvent::Sync { name: "now".into() }));
    }

    #[tokio::test]
    async fn cancel_prevents_delivery() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut alarms = TokioAlarmScheduler::new(Handle::current(), tx, 60);
        alarms.arm("later", Utc::now() + Duration::milliseconds(200), WakeMode::Exact);
        assert_eq!(alarms.live(), 1);
        alarms.cancel("later");

        let waited = tokio::time::timeout(StdDuration::from_millis(500), rx.recv()).await;
        assert!(waited.is_err(), "cancelled alarm was delivered");
        assert_eq!(alarms.live(), 0);
    }

    #[tokio::test]
    async fn rearm_replaces_previous_timer() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut alarms = TokioAlarmScheduler::new(Handle::current(), tx, 60);
        alarms.arm("x", Utc::now() + Duration::hours(1), WakeMode::Exact);
        alarms.arm("x", Utc::now(), WakeMode::Exact);
        assert!(alarms.live() <= 1);

        let first = tokio::time::timeout(StdDuration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(first, Some(SyncEvent::Sync { name: "x".into() }));
        let second = tokio::time::timeout(StdDuration::from_millis(300), rx.recv()).await;
        assert!(second.is_err(), "replaced timer still fired");
    }
}
