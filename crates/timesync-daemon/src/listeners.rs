//! Listener kinds shipped with the daemon.

use std::process::Command;

use anyhow::{bail, Context};
use timesync_core::{ListenerConfig, ListenerEntry};
use timesync_scheduler::{ListenerRegistry, SyncContext, SyncListener};
use tracing::{debug, info};

/// Longest stderr excerpt carried into a failure record.
const STDERR_TAIL_BYTES: usize = 512;

/// Runs a shell command; a non-zero exit is a failed sync.
pub struct CommandListener {
    config: ListenerConfig,
    command: String,
}

impl CommandListener {
    pub fn from_entry(entry: &ListenerEntry) -> anyhow::Result<Self> {
        let command = entry
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .with_context(|| format!("listener {} of kind 'command' needs a command", entry.name))?;
        Ok(Self {
            config: entry.listener_config()?,
            command,
        })
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let start = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|i| text.len() - i <= STDERR_TAIL_BYTES)
        .unwrap_or(text.len());
    text[start..].to_string()
}

impl SyncListener for CommandListener {
    fn config(&self) -> ListenerConfig {
        self.config
    }

    fn on_sync(&mut self, ctx: &SyncContext<'_>) -> anyhow::Result<()> {
        debug!(listener = %ctx.name, command = %self.command, "running sync command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("TIMESYNC_LISTENER", ctx.name)
            .env("TIMESYNC_FIRED_AT", ctx.fired_at.to_rfc3339())
            .env("TIMESYNC_POWER_CONNECTED", if ctx.power_connected { "1" } else { "0" })
            .output()
            .with_context(|| format!("failed to spawn `{}`", self.command))?;

        if !output.status.success() {
            bail!("`{}` exited with {}: {}", self.command, output.status, tail(&output.stderr));
        }
        Ok(())
    }
}

/// Logs each sync and always succeeds. Handy for checking a schedule.
pub struct LogListener {
    config: ListenerConfig,
}

impl SyncListener for LogListener {
    fn config(&self) -> ListenerConfig {
        self.config
    }

    fn on_sync(&mut self, ctx: &SyncContext<'_>) -> anyhow::Result<()> {
        info!(listener = %ctx.name, fired_at = %ctx.fired_at, power_connected = ctx.power_connected, "sync");
        Ok(())
    }
}

/// Registry with every built-in kind.
pub fn builtin_registry() -> ListenerRegistry {
    let mut registry = ListenerRegistry::new();
    registry.register("command", |entry: &ListenerEntry| {
        Ok(Box::new(CommandListener::from_entry(entry)?) as Box<dyn SyncListener>)
    });
    registry.register("log", |entry: &ListenerEntry| {
        Ok(Box::new(LogListener {
            config: entry.listener_config()?,
        }) as Box<dyn SyncListener>)
    });
    registry
}
