use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use timesync_core::TimeSpan;

/// Compute the next un-jittered event for `span`, strictly *after* `from`.
///
/// Pure and monotonic: for a fixed span, a later `from` never yields an
/// earlier result. Timestamps at the far end of chrono's range saturate to
/// `from` advanced as far as representable rather than failing.
pub fn next_event(from: DateTime<Utc>, span: &TimeSpan) -> DateTime<Utc> {
    match span {
        TimeSpan::Interval { every } => from
            .checked_add_signed(*every)
            .unwrap_or(DateTime::<Utc>::MAX_UTC),

        TimeSpan::Daily { at } => {
            let candidate = at_wall_clock(from, *at);
            if candidate > from {
                candidate
            } else {
                // Today's slot has passed: advance to tomorrow.
                add_days(candidate, 1)
            }
        }

        TimeSpan::Weekly { weekday, at } => {
            let today = i64::from(from.weekday().num_days_from_monday());
            let target = i64::from(weekday.num_days_from_monday());
            let days_ahead = (target - today).rem_euclid(7);

            let candidate = at_wall_clock(add_days(from, days_ahead), *at);
            if candidate > from {
                candidate
            } else {
                // Same weekday but the time already passed this week.
                add_days(candidate, 7)
            }
        }
    }
}

fn at_wall_clock(day: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    day.date_naive().and_time(at).and_utc()
}

fn add_days(t: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    t.checked_add_signed(Duration::days(days))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
