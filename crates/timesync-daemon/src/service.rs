use timesync_scheduler::{SchedulerStatus, SyncEvent, SyncStateMachine};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info};

/// Capacity of the event queue feeding the worker.
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// Run `machine` on a dedicated blocking worker, one event at a time in
/// arrival order.
///
/// The worker exits after handling a `Stop` once `shutdown` reads `true`, or
/// when every sender is gone. It returns the machine's final status.
pub fn spawn_worker(
    mut machine: SyncStateMachine,
    mut events: mpsc::Receiver<SyncEvent>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<SchedulerStatus> {
    tokio::task::spawn_blocking(move || {
        info!("sync worker started");
        while let Some(event) = events.blocking_recv() {
            let is_stop = event == SyncEvent::Stop;
            match machine.handle(event) {
                Ok(state) => debug!(%state, "event handled"),
                // Store failures only; the machine state is left as it was.
                Err(e) => error!("event handling failed: {e}"),
            }
            if is_stop && *shutdown.borrow() {
                break;
            }
        }
        info!("sync worker stopped");
        machine.status()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Utc};
    use timesync_core::{ListenerConfig, TimeSpan, WakeMode};
    use timesync_scheduler::db::SqliteStore;
    use timesync_scheduler::host::{AlarmScheduler, NetworkMonitor, PowerMonitor, SystemClock};
    use timesync_scheduler::{Collaborators, Listeners, SyncContext, SyncListener, SyncState};

    #[derive(Clone, Default)]
    struct Armed(Arc<Mutex<Vec<String>>>);

    impl AlarmScheduler for Armed {
        fn arm(&mut self, id: &str, _at: DateTime<Utc>, _mode: WakeMode) {
            self.0.lock().unwrap().push(id.to_string());
        }
        fn cancel(&mut self, id: &str) {
            self.0.lock().unwrap().retain(|a| a != id);
        }
    }

    struct Online;

    impl NetworkMonitor for Online {
        fn is_reachable(&self) -> bool {
            true
        }
        fn enable_watch(&mut self) {}
        fn disable_watch(&mut self) {}
    }

    struct NoPower;

    impl PowerMonitor for NoPower {
        fn enable_watch(&mut self) {}
        fn disable_watch(&mut self) {}
    }

    struct Counter(Arc<Mutex<u32>>);

    impl SyncListener for Counter {
        fn config(&self) -> ListenerConfig {
            ListenerConfig::new(TimeSpan::every_secs(3600).unwrap(), chrono::Duration::zero())
                .unwrap()
        }
        fn on_sync(&mut self, _ctx: &SyncContext<'_>) -> anyhow::Result<()> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_processes_events_in_order_and_stops() {
        let armed = Armed::default();
        let synced = Arc::new(Mutex::new(0));
        let mut listeners = Listeners::new();
        listeners.insert("c".to_string(), Box::new(Counter(Arc::clone(&synced))));

        let machine = SyncStateMachine::new(
            listeners,
            7,
            Collaborators {
                alarms: Box::new(armed.clone()),
                network: Box::new(Online),
                power: Box::new(NoPower),
                store: Box::new(SqliteStore::open_in_memory().unwrap()),
                clock: Box::new(SystemClock),
            },
        )
        .unwrap();

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = spawn_worker(machine, rx, shutdown_rx);

        tx.send(SyncEvent::Start).await.unwrap();
        tx.send(SyncEvent::Sync { name: "c".into() }).await.unwrap();
        shutdown_tx.send(true).unwrap();
        tx.send(SyncEvent::Stop).await.unwrap();

        let status = worker.await.unwrap();
        assert_eq!(status.state, SyncState::Stopped);
        assert!(status.armed.is_empty());
        assert!(armed.0.lock().unwrap().is_empty());
        assert_eq!(*synced.lock().unwrap(), 1);
    }
}
