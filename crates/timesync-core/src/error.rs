use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid time span: {0}")]
    InvalidTimeSpan(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TimeSyncError {
    /// Short error code string used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            TimeSyncError::Config(_) => "CONFIG_ERROR",
            TimeSyncError::InvalidTimeSpan(_) => "INVALID_TIME_SPAN",
            TimeSyncError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TimeSyncError>;
