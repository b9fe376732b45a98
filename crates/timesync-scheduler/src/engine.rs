use std::collections::BTreeMap;

use timesync_core::WakeMode;
use tracing::{debug, error, info, warn};

use crate::{
    alarms::ListenerSchedule,
    db::SchedulerStore,
    error::Result,
    host::{AlarmScheduler, Clock, NetworkMonitor, PowerMonitor},
    jitter::JitterGenerator,
    listener::{Listeners, SyncContext},
    seed::{DeviceIdentity, DeviceSeedManager},
    types::{FailureRecord, SchedulerStatus, SyncEvent, SyncState},
};

/// Host-side implementations the state machine drives.
pub struct Collaborators {
    pub alarms: Box<dyn AlarmScheduler>,
    pub network: Box<dyn NetworkMonitor>,
    pub power: Box<dyn PowerMonitor>,
    pub store: Box<dyn SchedulerStore>,
    pub clock: Box<dyn Clock>,
}

/// In-memory state for the life of the process. Only the seed and power
/// flag are mirrored to the store.
pub struct SchedulerRuntimeState {
    listeners: Listeners,
    seed: i64,
    power_connected: bool,
    network_watch: bool,
    power_watch: bool,
    state: SyncState,
    failures: BTreeMap<String, FailureRecord>,
}

impl SchedulerRuntimeState {
    pub fn seed(&self) -> i64 {
        self.seed
    }

    fn wake_mode(&self) -> WakeMode {
        WakeMode::for_power(self.power_connected)
    }
}

/// Event-driven controller for all listeners' alarms.
///
/// Not thread-safe by construction: exactly one event is handled at a time
/// through [`SyncStateMachine::handle`], and the host serialises delivery.
pub struct SyncStateMachine {
    runtime: SchedulerRuntimeState,
    schedule: ListenerSchedule,
    network: Box<dyn NetworkMonitor>,
    power: Box<dyn PowerMonitor>,
    store: Box<dyn SchedulerStore>,
    clock: Box<dyn Clock>,
}

impl SyncStateMachine {
    /// Build the machine around an already-known device seed. The power flag
    /// is read back from the store. Starts in [`SyncState::Stopped`].
    pub fn new(listeners: Listeners, seed: i64, host: Collaborators) -> Result<Self> {
        let power_connected = host.store.power_connected()?;
        info!(
            listeners = listeners.len(),
            power_connected, "sync state machine initialised"
        );
        Ok(Self {
            runtime: SchedulerRuntimeState {
                listeners,
                seed,
                power_connected,
                network_watch: false,
                power_watch: false,
                state: SyncState::Stopped,
                failures: BTreeMap::new(),
            },
            schedule: ListenerSchedule::new(host.alarms, JitterGenerator::new(seed)),
            network: host.network,
            power: host.power,
            store: host.store,
            clock: host.clock,
        })
    }

    /// Create (or load) the device seed from `identity`, then build the machine.
    pub fn bootstrap<I: DeviceIdentity>(
        listeners: Listeners,
        identity: I,
        mut host: Collaborators,
    ) -> Result<Self> {
        let seed = DeviceSeedManager::new(identity).get_or_create_seed(host.store.as_mut())?;
        Self::new(listeners, seed, host)
    }

    /// Process one event to completion and return the resulting state.
    ///
    /// Only store failures surface as errors; every other condition
    /// (unreachable network, failing listener, unknown name) is absorbed
    /// into the state transition.
    pub fn handle(&mut self, event: SyncEvent) -> Result<SyncState> {
        let before = self.runtime.state;
        debug!(%event, state = %before, "handling event");

        match event {
            SyncEvent::Start => self.on_start(),
            SyncEvent::Stop => self.on_stop(),
            SyncEvent::Sync { name } => self.on_sync(&name),
            SyncEvent::NetworkRestored => self.on_network_restored(),
            SyncEvent::PowerChanged { connected } => self.on_power_changed(connected)?,
        }

        let after = self.runtime.state;
        if after != before {
            info!(from = %before, to = %after, "sync state changed");
        }
        Ok(after)
    }

    pub fn state(&self) -> SyncState {
        self.runtime.state
    }

    pub fn runtime(&self) -> &SchedulerRuntimeState {
        &self.runtime
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.runtime.state,
            power_connected: self.runtime.power_connected,
            network_watch: self.runtime.network_watch,
            power_watch: self.runtime.power_watch,
            armed: self.schedule.pending().clone(),
            failures: self.runtime.failures.clone(),
        }
    }

    // --- event handlers ----------------------------------------------------

    fn on_start(&mut self) {
        self.cancel_all();
        if self.runtime.network_watch {
            // Start supersedes any outstanding wait for connectivity.
            self.network.disable_watch();
            self.runtime.network_watch = false;
        }
        self.arm_all();
        self.enter_running();
    }

    fn on_stop(&mut self) {
        self.cancel_all();
        self.network.disable_watch();
        self.power.disable_watch();
        self.runtime.network_watch = false;
        self.runtime.power_watch = false;
        self.runtime.state = SyncState::Stopped;
    }

    fn on_sync(&mut self, name: &str) {
        if !self.runtime.listeners.contains_key(name) {
            warn!(listener = %name, "sync requested for unknown listener");
            return;
        }
        let fired = self.schedule.mark_fired(name);

        if !self.network.is_reachable() {
            info!(listener = %name, "network unreachable; suspending all alarms until it returns");
            self.cancel_all();
            self.network.enable_watch();
            self.runtime.network_watch = true;
            self.ensure_power_watch();
            self.runtime.state = SyncState::WaitingForNetwork;
            return;
        }

        let now = self.clock.now();
        let wake = self.runtime.wake_mode();
        let power_connected = self.runtime.power_connected;
        let Some(listener) = self.runtime.listeners.get_mut(name) else {
            return;
        };

        let ctx = SyncContext {
            name,
            fired_at: now,
            power_connected,
        };
        match listener.on_sync(&ctx) {
            Ok(()) => {
                if self.runtime.failures.remove(name).is_some() {
                    info!(listener = %name, "listener recovered");
                }
                let config = listener.config();
                let finished = self.clock.now();
                // An early fire must not land on the slot it just served.
                let after = fired.map_or(finished, |alarm| alarm.exact.max(finished));
                self.schedule.rearm_after(name, &config, after, finished, wake);
                info!(listener = %name, "sync completed");
            }
            Err(e) => {
                // No retry policy: the listener stays dormant until the next
                // global reschedule re-arms it.
                let record = self
                    .runtime
                    .failures
                    .entry(name.to_string())
                    .or_insert_with(|| FailureRecord {
                        count: 0,
                        last_error: String::new(),
                        last_failed_at: now,
                    });
                record.count = record.count.saturating_add(1);
                record.last_error = format!("{e:#}");
                record.last_failed_at = now;
                error!(
                    listener = %name,
                    failures = record.count,
                    "sync failed, listener dormant until next reschedule: {e:#}"
                );
            }
        }

        // A sync outside the waiting state leaves the machine running.
        if self.runtime.state == SyncState::Stopped {
            self.enter_running();
        }
    }

    fn on_network_restored(&mut self) {
        info!("network restored; rescheduling all listeners");
        self.network.disable_watch();
        self.runtime.network_watch = false;
        self.arm_all();
        self.enter_running();
    }

    fn on_power_changed(&mut self, connected: bool) -> Result<()> {
        self.store.set_power_connected(connected)?;
        self.runtime.power_connected = connected;
        info!(connected, wake = %self.runtime.wake_mode(), "power state changed");

        // Armed alarms carry the old wake mode; replace them all.
        match self.runtime.state {
            SyncState::Running | SyncState::WaitingForNetwork => {
                self.cancel_all();
                self.arm_all();
            }
            SyncState::Stopped => {
                debug!("no alarms armed; new wake mode applies on next arm");
            }
        }
        Ok(())
    }

    // --- private helpers ---------------------------------------------------

    fn arm_all(&mut self) {
        let now = self.clock.now();
        let wake = self.runtime.wake_mode();
        for (name, listener) in &self.runtime.listeners {
            let config = listener.config();
            self.schedule.rearm(name, &config, now, wake);
        }
        debug!(armed = self.schedule.pending().len(), wake = %wake, "alarms armed");
    }

    fn cancel_all(&mut self) {
        self.schedule.cancel_all(self.runtime.listeners.keys());
    }

    /// Every state but `Stopped` follows power changes.
    fn ensure_power_watch(&mut self) {
        if !self.runtime.power_watch {
            self.power.enable_watch();
            self.runtime.power_watch = true;
        }
    }

    fn enter_running(&mut self) {
        self.ensure_power_watch();
        self.runtime.state = SyncState::Running;
    }
}

impl std::fmt::Debug for SyncStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateMachine")
            .field("state", &self.runtime.state)
            .field("listeners", &self.runtime.listeners.len())
            .field("power_connected", &self.runtime.power_connected)
            .field("armed", &self.schedule.pending().len())
            .finish()
    }
}
