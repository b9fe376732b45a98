use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use timesync_core::{ListenerConfig, ListenerEntry};
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};

/// Passed to [`SyncListener::on_sync`] when its alarm fires.
#[derive(Debug, Clone)]
pub struct SyncContext<'a> {
    pub name: &'a str,
    pub fired_at: DateTime<Utc>,
    pub power_connected: bool,
}

/// A periodically synced unit of work.
///
/// `on_sync` runs on the scheduler's single event worker, so a slow sync
/// delays every event queued behind it.
pub trait SyncListener: Send {
    fn config(&self) -> ListenerConfig;

    /// Perform the sync. An error leaves the listener dormant until the next
    /// global reschedule (start, network restored or power change).
    fn on_sync(&mut self, ctx: &SyncContext<'_>) -> anyhow::Result<()>;
}

/// Loaded listeners keyed by name; iteration order is stable.
pub type Listeners = BTreeMap<String, Box<dyn SyncListener>>;

/// Builds a listener from its config entry.
pub type ListenerFactory =
    Box<dyn Fn(&ListenerEntry) -> anyhow::Result<Box<dyn SyncListener>> + Send + Sync>;

/// Maps listener kinds to factories and resolves declared entries once at
/// startup.
#[derive(Default)]
pub struct ListenerRegistry {
    factories: HashMap<String, ListenerFactory>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ListenerEntry) -> anyhow::Result<Box<dyn SyncListener>> + Send + Sync + 'static,
    {
        if self.factories.insert(kind.to_string(), Box::new(factory)).is_some() {
            warn!(kind, "listener factory replaced");
        }
        debug!(kind, "listener factory registered");
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiate every entry. Any unresolvable or invalid entry fails the
    /// whole load: a partially loaded listener set is never returned.
    pub fn load(&self, entries: &[ListenerEntry]) -> Result<Listeners> {
        let mut listeners = Listeners::new();

        for entry in entries {
            if listeners.contains_key(&entry.name) {
                return Err(SchedulerError::DuplicateListener {
                    name: entry.name.clone(),
                });
            }
            // Validate the declared schedule before instantiating anything.
            entry.listener_config()?;

            let factory =
                self.factories
                    .get(&entry.kind)
                    .ok_or_else(|| SchedulerError::UnknownListenerKind {
                        name: entry.name.clone(),
                        kind: entry.kind.clone(),
                    })?;
            let listener = factory(entry).map_err(|e| SchedulerError::InvalidListener {
                name: entry.name.clone(),
                reason: format!("{e:#}"),
            })?;

            // Listeners may build their config by hand; hold them to the same rules.
            let config = listener.config();
            ListenerConfig::new(config.time_span, config.range)?;

            info!(
                listener = %entry.name,
                kind = %entry.kind,
                schedule = %config.time_span,
                range_secs = config.range.num_seconds(),
                "listener loaded"
            );
            listeners.insert(entry.name.clone(), listener);
        }

        if listeners.is_empty() {
            warn!("no listeners declared; scheduler will have nothing to do");
        }
        Ok(listeners)
    }
}
