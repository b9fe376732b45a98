use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use timesync_core::{ListenerConfig, WakeMode};
use tracing::{debug, warn};

use crate::{host::AlarmScheduler, jitter::JitterGenerator, schedule::next_event, types::ArmedAlarm};

/// Jittered fire time for `name`: the next exact event after `from` plus an
/// offset in `±range / 2`. Returns `(exact, fire_at)`. `fire_at` may land
/// before `from` when the jitter pulls it there.
pub fn fire_time(
    jitter: &JitterGenerator,
    name: &str,
    config: &ListenerConfig,
    from: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let exact = next_event(from, &config.time_span);
    let offset = jitter.offset(name, exact, config.range);
    (exact, exact.checked_add_signed(offset).unwrap_or(exact))
}

/// Owns the one-alarm-per-listener bookkeeping in front of the host's
/// [`AlarmScheduler`].
///
/// Every arm is preceded by a cancel for the same id, so at no point does the
/// scheduler hold two timers for one listener.
pub struct ListenerSchedule {
    alarms: Box<dyn AlarmScheduler>,
    jitter: JitterGenerator,
    pending: BTreeMap<String, ArmedAlarm>,
}

impl ListenerSchedule {
    pub fn new(alarms: Box<dyn AlarmScheduler>, jitter: JitterGenerator) -> Self {
        Self {
            alarms,
            jitter,
            pending: BTreeMap::new(),
        }
    }

    pub fn calculate_fire_time(
        &self,
        name: &str,
        config: &ListenerConfig,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        fire_time(&self.jitter, name, config, now).1
    }

    /// Replace whatever is armed for `name` with a freshly computed alarm.
    ///
    /// A fire time already behind `now` is armed at `now` and fires
    /// immediately. A fire time at or before the Unix epoch is never armed.
    pub fn rearm(
        &mut self,
        name: &str,
        config: &ListenerConfig,
        now: DateTime<Utc>,
        wake: WakeMode,
    ) -> Option<ArmedAlarm> {
        self.rearm_after(name, config, now, now, wake)
    }

    /// Like [`rearm`](Self::rearm), but the next slot is the first one
    /// strictly after `after`. Passing the slot that just fired keeps an
    /// early (negatively jittered) fire from landing on that slot again.
    pub fn rearm_after(
        &mut self,
        name: &str,
        config: &ListenerConfig,
        after: DateTime<Utc>,
        now: DateTime<Utc>,
        wake: WakeMode,
    ) -> Option<ArmedAlarm> {
        let (exact, computed) = fire_time(&self.jitter, name, config, after.max(now));
        self.cancel(name);

        if computed.timestamp_millis() <= 0 {
            warn!(listener = %name, fire_at = %computed, "computed fire time is not positive; not armed");
            return None;
        }
        let fire_at = computed.max(now);
        if fire_at > computed {
            debug!(listener = %name, behind_ms = (now - computed).num_milliseconds(), "jitter landed in the past; firing now");
        }

        self.alarms.arm(name, fire_at, wake);
        let armed = ArmedAlarm { fire_at, exact, wake };
        self.pending.insert(name.to_string(), armed);
        debug!(listener = %name, fire_at = %fire_at, exact = %exact, wake = %wake, "alarm armed");
        Some(armed)
    }

    /// Cancel the alarm for `name`, whether or not one is recorded. Timers
    /// can outlive the bookkeeping (e.g. armed by a previous process).
    pub fn cancel(&mut self, name: &str) {
        self.alarms.cancel(name);
        self.pending.remove(name);
    }

    pub fn cancel_all<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) {
        for name in names {
            self.cancel(name);
        }
        debug_assert!(self.pending.is_empty(), "alarm armed for an unknown listener");
    }

    /// Forget a one-shot alarm that has just fired, returning what it was.
    pub fn mark_fired(&mut self, name: &str) -> Option<ArmedAlarm> {
        self.pending.remove(name)
    }

    pub fn pending(&self) -> &BTreeMap<String, ArmedAlarm> {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};
    use timesync_core::TimeSpan;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Arm(String, DateTime<Utc>, WakeMode),
        Cancel(String),
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl AlarmScheduler for Recorder {
        fn arm(&mut self, id: &str, at: DateTime<Utc>, mode: WakeMode) {
            self.0.lock().unwrap().push(Call::Arm(id.to_string(), at, mode));
        }
        fn cancel(&mut self, id: &str) {
            self.0.lock().unwrap().push(Call::Cancel(id.to_string()));
        }
    }

    fn hourly(range_mins: i64) -> ListenerConfig {
        ListenerConfig::new(TimeSpan::every_secs(3600).unwrap(), Duration::minutes(range_mins)).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn zero_range_is_exact_event() {
        let jitter = JitterGenerator::new(1234);
        let config = hourly(0);
        let exact = now() + Duration::hours(1);
        assert_eq!(fire_time(&jitter, "x", &config, now()), (exact, exact));
    }

    #[test]
    fn jittered_time_within_window() {
        let config = hourly(10);
        for seed in 0..300 {
            let (_, t) = fire_time(&JitterGenerator::new(seed), "x", &config, now());
            assert!(t >= now() + Duration::minutes(55) && t <= now() + Duration::minutes(65));
        }
    }

    #[test]
    fn rearm_cancels_before_arming() {
        let rec = Recorder::default();
        let mut schedule = ListenerSchedule::new(Box::new(rec.clone()), JitterGenerator::new(5));
        let config = hourly(10);

        schedule.rearm("a", &config, now(), WakeMode::Inexact).unwrap();
        schedule.rearm("a", &config, now(), WakeMode::Exact).unwrap();

        let calls = rec.0.lock().unwrap().clone();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], Call::Cancel("a".into()));
        assert!(matches!(calls[1], Call::Arm(ref id, _, WakeMode::Inexact) if id == "a"));
        assert_eq!(calls[2], Call::Cancel("a".into()));
        assert!(matches!(calls[3], Call::Arm(ref id, _, WakeMode::Exact) if id == "a"));
        assert_eq!(schedule.pending().len(), 1);
        assert_eq!(schedule.pending()["a"].wake, WakeMode::Exact);
    }

    #[test]
    fn past_fire_time_fires_now() {
        let rec = Recorder::default();
        // Daily 08:30 with a two-hour window, computed at 08:00: draws of
        // more than 30 minutes early land before now.
        let config = ListenerConfig::new(TimeSpan::daily(8, 30).unwrap(), Duration::hours(2)).unwrap();
        let mut landed_early = 0;

        for seed in 0..50 {
            let mut schedule = ListenerSchedule::new(Box::new(rec.clone()), JitterGenerator::new(seed));
            if schedule.calculate_fire_time("wide", &config, now()) < now() {
                landed_early += 1;
            }
            let armed = schedule.rearm("wide", &config, now(), WakeMode::Inexact).unwrap();
            assert!(armed.fire_at >= now());
            assert_eq!(armed.exact, now() + Duration::minutes(30));
        }
        assert!(landed_early > 0);
    }

    #[test]
    fn rearm_after_skips_the_slot_that_fired() {
        let rec = Recorder::default();
        let config = ListenerConfig::new(TimeSpan::daily(9, 30).unwrap(), Duration::minutes(30)).unwrap();
        let slot = Utc.with_ymd_and_hms(2026, 6, 1, 9, 30, 0).unwrap();
        let early = slot - Duration::minutes(12);

        for seed in 0..50 {
            let mut schedule = ListenerSchedule::new(Box::new(rec.clone()), JitterGenerator::new(seed));
            let armed = schedule
                .rearm_after("daily", &config, slot, early, WakeMode::Exact)
                .unwrap();
            assert_eq!(armed.exact, slot + Duration::days(1));
            assert!(armed.fire_at >= slot + Duration::days(1) - Duration::minutes(15));
        }
    }

    #[test]
    fn epoch_fire_time_is_not_armed() {
        let rec = Recorder::default();
        let mut schedule = ListenerSchedule::new(Box::new(rec.clone()), JitterGenerator::new(0));
        let config = hourly(0);
        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 22, 0, 0).unwrap();

        assert!(schedule.rearm("old", &config, before_epoch, WakeMode::Exact).is_none());
        assert!(schedule.pending().is_empty());
        assert_eq!(*rec.0.lock().unwrap(), vec![Call::Cancel("old".into())]);
    }

    #[test]
    fn cancel_all_clears_bookkeeping() {
        let rec = Recorder::default();
        let mut schedule = ListenerSchedule::new(Box::new(rec), JitterGenerator::new(9));
        let names = vec!["a".to_string(), "b".to_string()];
        for name in &names {
            schedule.rearm(name, &hourly(4), now(), WakeMode::Inexact);
        }
        assert_eq!(schedule.pending().len(), 2);
        schedule.cancel_all(&names);
        assert!(schedule.pending().is_empty());
    }
}
