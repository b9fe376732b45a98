use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::ListenerEntry;

pub const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:443";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_NETWORK_WATCH_SECS: u64 = 30; // reachability poll while waiting for network
pub const DEFAULT_POWER_POLL_SECS: u64 = 15;
pub const DEFAULT_SUPPLY_DIR: &str = "/sys/class/power_supply";
pub const DEFAULT_INEXACT_WINDOW_SECS: u64 = 60; // inexact alarms coalesce on minute boundaries

/// Top-level config (timesync.toml + TIMESYNC_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSyncConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub alarms: AlarmConfig,
    /// Declared listeners, in the order they were written.
    #[serde(default)]
    pub listeners: Vec<ListenerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Create the directory holding the database file, if any.
    pub fn ensure_parent_dir(&self) -> crate::error::Result<()> {
        match std::path::Path::new(&self.path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Extra identity material mixed into the device seed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Set this on images cloned across many machines, where machine-id is shared.
    pub install_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// host:port that must accept a TCP connection for the network to count as reachable.
    #[serde(default = "default_probe_addr")]
    pub probe_addr: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_network_watch_secs")]
    pub watch_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_addr: default_probe_addr(),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            watch_interval_secs: DEFAULT_NETWORK_WATCH_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// sysfs directory holding one subdirectory per power supply.
    #[serde(default = "default_supply_dir")]
    pub supply_dir: String,
    #[serde(default = "default_power_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            supply_dir: default_supply_dir(),
            poll_interval_secs: DEFAULT_POWER_POLL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Inexact alarms are deferred to the next multiple of this window.
    #[serde(default = "default_inexact_window_secs")]
    pub inexact_window_secs: u64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            inexact_window_secs: DEFAULT_INEXACT_WINDOW_SECS,
        }
    }
}

fn default_probe_addr() -> String {
    DEFAULT_PROBE_ADDR.to_string()
}
fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}
fn default_network_watch_secs() -> u64 {
    DEFAULT_NETWORK_WATCH_SECS
}
fn default_supply_dir() -> String {
    DEFAULT_SUPPLY_DIR.to_string()
}
fn default_power_poll_secs() -> u64 {
    DEFAULT_POWER_POLL_SECS
}
fn default_inexact_window_secs() -> u64 {
    DEFAULT_INEXACT_WINDOW_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.timesync/timesync.db", home)
}

impl TimeSyncConfig {
    /// Load config from a TOML file with TIMESYNC_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.timesync/timesync.toml
    ///
    /// A missing file yields defaults; a malformed one is a `Config` error.
    ///
    /// Nested keys use a double underscore: `TIMESYNC_NETWORK__PROBE_ADDR`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        if !std::path::Path::new(&path).exists() {
            tracing::warn!(path = %path, "config file not found, using defaults");
        }

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::TimeSyncError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TIMESYNC_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.timesync/timesync.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeSpan;
    use figment::Jail;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = TimeSyncConfig::load(Some("does-not-exist.toml"))
                .map_err(|e| e.to_string())?;
            assert!(config.listeners.is_empty());
            assert_eq!(config.network.probe_addr, DEFAULT_PROBE_ADDR);
            assert_eq!(config.alarms.inexact_window_secs, DEFAULT_INEXACT_WINDOW_SECS);
            Ok(())
        });
    }

    #[test]
    fn parses_listeners_and_sections() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "timesync.toml",
                r#"
                [database]
                path = "/tmp/ts.db"

                [device]
                install_id = "rack-7"

                [[listeners]]
                name = "weather"
                kind = "command"
                command = "curl -fsS https://example.invalid/weather"
                range_secs = 600
                schedule = { kind = "interval", every_secs = 3600 }

                [[listeners]]
                name = "digest"
                kind = "log"
                schedule = { kind = "daily", hour = 4, minute = 30 }
                "#,
            )?;
            let config = TimeSyncConfig::load(Some("timesync.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.database.path, "/tmp/ts.db");
            assert_eq!(config.device.install_id.as_deref(), Some("rack-7"));
            assert_eq!(config.listeners.len(), 2);
            assert_eq!(config.listeners[0].range_secs, 600);
            assert_eq!(config.listeners[0].schedule, TimeSpan::every_secs(3600).unwrap());
            assert_eq!(config.listeners[1].range_secs, 0);
            assert_eq!(config.listeners[1].schedule, TimeSpan::daily(4, 30).unwrap());
            Ok(())
        });
    }

    #[test]
    fn invalid_schedule_is_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "timesync.toml",
                r#"
                [[listeners]]
                name = "broken"
                kind = "log"
                schedule = { kind = "daily", hour = 25, minute = 0 }
                "#,
            )?;
            let err = TimeSyncConfig::load(Some("timesync.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            Ok(())
        });
    }

    #[test]
    fn database_dir_is_created() {
        Jail::expect_with(|jail| {
            let db = DatabaseConfig {
                path: jail.directory().join("state/nested/ts.db").display().to_string(),
            };
            db.ensure_parent_dir().map_err(|e| e.to_string())?;
            assert!(jail.directory().join("state/nested").is_dir());

            // A bare file name needs no directory.
            let bare = DatabaseConfig { path: "ts.db".into() };
            bare.ensure_parent_dir().map_err(|e| e.to_string())?;
            Ok(())
        });
    }

    #[test]
    fn database_dir_under_a_file_is_io_error() {
        Jail::expect_with(|jail| {
            jail.create_file("occupied", "not a directory")?;
            let db = DatabaseConfig {
                path: jail.directory().join("occupied/ts.db").display().to_string(),
            };
            let err = db.ensure_parent_dir().unwrap_err();
            assert_eq!(err.code(), "IO_ERROR");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("TIMESYNC_NETWORK__PROBE_ADDR", "10.0.0.1:53");
            jail.set_env("TIMESYNC_ALARMS__INEXACT_WINDOW_SECS", "300");
            let config = TimeSyncConfig::load(Some("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.network.probe_addr, "10.0.0.1:53");
            assert_eq!(config.alarms.inexact_window_secs, 300);
            Ok(())
        });
    }
}
