use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error from the persistent store.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A listener entry or schedule failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] timesync_core::TimeSyncError),

    /// No factory is registered for the declared listener kind.
    #[error("Unknown listener kind '{kind}' for listener '{name}'")]
    UnknownListenerKind { name: String, kind: String },

    /// Two declared listeners share a name (names double as alarm ids).
    #[error("Duplicate listener name: {name}")]
    DuplicateListener { name: String },

    /// A factory rejected the entry it was asked to build.
    #[error("Listener '{name}' could not be built: {reason}")]
    InvalidListener { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
