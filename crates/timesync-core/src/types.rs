use chrono::{Duration, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TimeSyncError};

/// Recurrence descriptor consumed by the next-event calculation.
///
/// Always constructed through a validating path (the constructors below or
/// deserialisation via [`TimeSpanSpec`]), so a held `TimeSpan` is well formed
/// and computing its next event cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TimeSpanSpec", into = "TimeSpanSpec")]
pub enum TimeSpan {
    /// Repeat every `every`, measured from the reference time.
    Interval { every: Duration },

    /// Fire every day at the given wall-clock time (UTC).
    Daily { at: NaiveTime },

    /// Fire once a week on `weekday` at the given wall-clock time (UTC).
    Weekly { weekday: Weekday, at: NaiveTime },
}

impl TimeSpan {
    pub fn interval(every: Duration) -> Result<Self> {
        if every <= Duration::zero() {
            return Err(TimeSyncError::InvalidTimeSpan(format!(
                "interval must be positive, got {}s",
                every.num_seconds()
            )));
        }
        Ok(TimeSpan::Interval { every })
    }

    pub fn every_secs(secs: u64) -> Result<Self> {
        let every = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| TimeSyncError::InvalidTimeSpan(format!("interval {secs}s is too large")))?;
        Self::interval(every)
    }

    pub fn daily(hour: u8, minute: u8) -> Result<Self> {
        Ok(TimeSpan::Daily {
            at: wall_clock(hour, minute)?,
        })
    }

    /// `day` follows ISO weekday numbering: 0 = Monday … 6 = Sunday.
    pub fn weekly(day: u8, hour: u8, minute: u8) -> Result<Self> {
        let weekday = match day {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            6 => Weekday::Sun,
            other => {
                return Err(TimeSyncError::InvalidTimeSpan(format!(
                    "weekday must be 0..=6, got {other}"
                )))
            }
        };
        Ok(TimeSpan::Weekly {
            weekday,
            at: wall_clock(hour, minute)?,
        })
    }
}

impl TimeSpan {
    /// Spacing between consecutive events.
    pub fn period(&self) -> Duration {
        match self {
            TimeSpan::Interval { every } => *every,
            TimeSpan::Daily { .. } => Duration::days(1),
            TimeSpan::Weekly { .. } => Duration::weeks(1),
        }
    }
}

fn wall_clock(hour: u8, minute: u8) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0).ok_or_else(|| {
        TimeSyncError::InvalidTimeSpan(format!("invalid wall-clock time {hour:02}:{minute:02}"))
    })
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSpan::Interval { every } => write!(f, "every {}s", every.num_seconds()),
            TimeSpan::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            TimeSpan::Weekly { weekday, at } => {
                write!(f, "weekly on {weekday} at {}", at.format("%H:%M"))
            }
        }
    }
}

/// On-disk form of a [`TimeSpan`] (`kind = "interval" | "daily" | "weekly"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeSpanSpec {
    Interval { every_secs: u64 },
    Daily { hour: u8, minute: u8 },
    Weekly { day: u8, hour: u8, minute: u8 },
}

impl TryFrom<TimeSpanSpec> for TimeSpan {
    type Error = TimeSyncError;

    fn try_from(spec: TimeSpanSpec) -> Result<Self> {
        match spec {
            TimeSpanSpec::Interval { every_secs } => TimeSpan::every_secs(every_secs),
            TimeSpanSpec::Daily { hour, minute } => TimeSpan::daily(hour, minute),
            TimeSpanSpec::Weekly { day, hour, minute } => TimeSpan::weekly(day, hour, minute),
        }
    }
}

impl From<TimeSpan> for TimeSpanSpec {
    fn from(span: TimeSpan) -> Self {
        // Validated spans only hold whole-minute wall clocks and positive intervals.
        let hm = |at: NaiveTime| (at.hour() as u8, at.minute() as u8);
        match span {
            TimeSpan::Interval { every } => TimeSpanSpec::Interval {
                every_secs: every.num_seconds().unsigned_abs(),
            },
            TimeSpan::Daily { at } => {
                let (hour, minute) = hm(at);
                TimeSpanSpec::Daily { hour, minute }
            }
            TimeSpan::Weekly { weekday, at } => {
                let (hour, minute) = hm(at);
                TimeSpanSpec::Weekly {
                    day: weekday.num_days_from_monday() as u8,
                    hour,
                    minute,
                }
            }
        }
    }
}

/// Schedule declared by a listener: when it recurs and how widely to spread it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    pub time_span: TimeSpan,
    /// Full width of the jitter window; offsets fall within ±`range / 2`.
    pub range: Duration,
}

impl ListenerConfig {
    pub fn new(time_span: TimeSpan, range: Duration) -> Result<Self> {
        if range < Duration::zero() {
            return Err(TimeSyncError::Config(format!(
                "jitter range must be non-negative, got {}ms",
                range.num_milliseconds()
            )));
        }
        // Half the window must stay under one period, or draws can land on
        // the previous slot and fire back to back.
        if range > Duration::zero() && range / 2 >= time_span.period() {
            return Err(TimeSyncError::Config(format!(
                "jitter range {}s must be under twice the period of {time_span}",
                range.num_seconds()
            )));
        }
        Ok(Self { time_span, range })
    }
}

/// One `[[listeners]]` entry in timesync.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerEntry {
    /// Stable unique key; also used as the alarm id.
    pub name: String,
    /// Implementation to instantiate, resolved against the listener registry.
    pub kind: String,
    pub schedule: TimeSpan,
    /// Jitter window width in seconds (0 disables jitter).
    #[serde(default)]
    pub range_secs: u64,
    /// Shell command for the `command` listener kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl ListenerEntry {
    pub fn listener_config(&self) -> Result<ListenerConfig> {
        let range = i64::try_from(self.range_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                TimeSyncError::Config(format!(
                    "listener {}: range_secs {} is too large",
                    self.name, self.range_secs
                ))
            })?;
        ListenerConfig::new(self.schedule, range)
    }
}

/// Whether an armed timer must fire on time (waking the device) or may be
/// deferred and batched by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeMode {
    Exact,
    Inexact,
}

impl WakeMode {
    /// Exact while on external power, battery-friendly otherwise.
    pub fn for_power(power_connected: bool) -> Self {
        if power_connected {
            WakeMode::Exact
        } else {
            WakeMode::Inexact
        }
    }
}

impl fmt::Display for WakeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WakeMode::Exact => "exact",
            WakeMode::Inexact => "inexact",
        };
        write!(f, "{s}")
    }
}
