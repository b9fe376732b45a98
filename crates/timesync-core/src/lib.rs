//! Types and configuration shared by the scheduler core and the host daemon.

pub mod config;
pub mod error;
pub mod types;

pub use config::TimeSyncConfig;
pub use error::{Result, TimeSyncError};
pub use types::{ListenerConfig, ListenerEntry, TimeSpan, TimeSpanSpec, WakeMode};
