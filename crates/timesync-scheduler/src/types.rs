use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use timesync_core::WakeMode;

/// External stimulus delivered to the state machine, one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Start,
    Stop,
    /// The alarm for listener `name` fired (or a sync was requested manually).
    Sync { name: String },
    NetworkRestored,
    PowerChanged { connected: bool },
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::Start => write!(f, "start"),
            SyncEvent::Stop => write!(f, "stop"),
            SyncEvent::Sync { name } => write!(f, "sync({name})"),
            SyncEvent::NetworkRestored => write!(f, "network_restored"),
            SyncEvent::PowerChanged { connected } => write!(f, "power_changed({connected})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Stopped,
    /// Alarms armed normally; a listener whose last sync failed may be dormant.
    Running,
    /// Watching for connectivity; alarms were torn down on entry.
    WaitingForNetwork,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Stopped => "stopped",
            SyncState::Running => "running",
            SyncState::WaitingForNetwork => "waiting_for_network",
        };
        write!(f, "{s}")
    }
}

/// What the scheduler believes is armed for one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArmedAlarm {
    pub fire_at: DateTime<Utc>,
    /// Unjittered slot this alarm stands for.
    pub exact: DateTime<Utc>,
    pub wake: WakeMode,
}

/// Consecutive sync failures of one listener since its last success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub count: u32,
    pub last_error: String,
    pub last_failed_at: DateTime<Utc>,
}

/// Point-in-time view of the scheduler, for logs and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SyncState,
    pub power_connected: bool,
    pub network_watch: bool,
    pub power_watch: bool,
    pub armed: BTreeMap<String, ArmedAlarm>,
    pub failures: BTreeMap<String, FailureRecord>,
}
