//! Seams to the host environment.
//!
//! The state machine drives these; the host implements them over whatever
//! timer, connectivity and power primitives the platform offers. None of
//! them may call back into the state machine synchronously: events they
//! produce go through the host's event queue.

use chrono::{DateTime, Utc};
use timesync_core::WakeMode;

/// One-shot timers keyed by listener name.
///
/// When a timer fires the host delivers `SyncEvent::Sync { name: id }`.
pub trait AlarmScheduler: Send {
    /// Arm a timer for the absolute instant `at`. An instant in the past
    /// fires as soon as possible.
    fn arm(&mut self, id: &str, at: DateTime<Utc>, mode: WakeMode);

    /// Cancel the timer for `id`. No-op when nothing is armed.
    fn cancel(&mut self, id: &str);
}

pub trait NetworkMonitor: Send {
    /// Snapshot check: connected or connecting.
    fn is_reachable(&self) -> bool;

    /// Start watching; the host delivers a single `NetworkRestored` when
    /// connectivity returns.
    fn enable_watch(&mut self);

    fn disable_watch(&mut self);
}

/// While enabled, the host delivers `PowerChanged` on every transition.
pub trait PowerMonitor: Send {
    fn enable_watch(&mut self);
    fn disable_watch(&mut self);
}

pub trait Clock: Send {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
