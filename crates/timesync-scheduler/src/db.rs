use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::Result;

const KEY_SEED: &str = "seed";
const KEY_POWER_CONNECTED: &str = "power_connected";

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `timesync_prefs` scalar table (idempotent). Safe to call on
/// every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS timesync_prefs (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       INTEGER NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// The two scalars that must survive a restart.
///
/// Writes are expected to be durable when the call returns; the state
/// machine reads back what it wrote without re-checking.
pub trait SchedulerStore: Send {
    /// Device seed, or 0 when none has been created yet.
    fn seed(&self) -> Result<i64>;
    fn set_seed(&mut self, seed: i64) -> Result<()>;

    /// Last reported power state, `false` when never reported.
    fn power_connected(&self) -> Result<bool>;
    fn set_power_connected(&mut self, connected: bool) -> Result<()>;
}

/// [`SchedulerStore`] over a SQLite connection, one row per key.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn get(&self, key: &str) -> Result<Option<i64>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM timesync_prefs WHERE key = ?1",
                [key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, value: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO timesync_prefs (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                            updated_at = excluded.updated_at",
            rusqlite::params![key, value, now],
        )?;
        debug!(key, value, "preference stored");
        Ok(())
    }
}

impl SchedulerStore for SqliteStore {
    fn seed(&self) -> Result<i64> {
        Ok(self.get(KEY_SEED)?.unwrap_or(0))
    }

    fn set_seed(&mut self, seed: i64) -> Result<()> {
        self.put(KEY_SEED, seed)
    }

    fn power_connected(&self) -> Result<bool> {
        Ok(self.get(KEY_POWER_CONNECTED)?.is_some_and(|v| v != 0))
    }

    fn set_power_connected(&mut self, connected: bool) -> Result<()> {
        self.put(KEY_POWER_CONNECTED, i64::from(connected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.seed().unwrap(), 0);
        assert!(!store.power_connected().unwrap());
    }

    #[test]
    fn values_overwrite_in_place() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set_power_connected(true).unwrap();
        assert!(store.power_connected().unwrap());
        store.set_power_connected(false).unwrap();
        assert!(!store.power_connected().unwrap());

        store.set_seed(-981_234).unwrap();
        assert_eq!(store.seed().unwrap(), -981_234);
    }

    #[test]
    fn survives_reopen() {
        let dir = std::env::temp_dir().join(format!("timesync-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("prefs.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.set_seed(77).unwrap();
            store.set_power_connected(true).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.seed().unwrap(), 77);
        assert!(store.power_connected().unwrap());
        drop(store);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
