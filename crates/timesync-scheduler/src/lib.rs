//! `timesync-scheduler`: jittered periodic sync scheduling.
//!
//! # Overview
//!
//! Each registered listener declares a [`TimeSpan`](timesync_core::TimeSpan)
//! and a jitter range. The [`engine::SyncStateMachine`] computes every
//! listener's next fire time (exact event plus a per-device pseudo-random
//! offset), keeps exactly one alarm armed per listener through the host's
//! [`host::AlarmScheduler`], and reacts to connectivity and power changes.
//!
//! # States
//!
//! | State               | Meaning                                              |
//! |---------------------|------------------------------------------------------|
//! | `Stopped`           | No alarms, no watches                                |
//! | `Running`           | One alarm per listener (failed listeners dormant)    |
//! | `WaitingForNetwork` | Alarms torn down on entry; watching for connectivity |
//!
//! # Persistence
//!
//! Only the device seed and the power-connected flag survive a restart, in a
//! SQLite `timesync_prefs` table (see [`db::SqliteStore`]).

pub mod alarms;
pub mod db;
pub mod engine;
pub mod error;
pub mod host;
pub mod jitter;
pub mod listener;
pub mod schedule;
pub mod seed;
pub mod types;

pub use engine::{Collaborators, SchedulerRuntimeState, SyncStateMachine};
pub use error::{Result, SchedulerError};
pub use listener::{ListenerRegistry, Listeners, SyncContext, SyncListener};
pub use types::{ArmedAlarm, FailureRecord, SchedulerStatus, SyncEvent, SyncState};
