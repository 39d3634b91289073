use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, NaiveDate, Timelike};

use crate::model::{Minutes, Ms};

/// Source of "now". The engine never reads the system clock directly.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Clock reading `date` at `time` in UTC.
    pub fn at(date: NaiveDate, time: Minutes) -> Self {
        Self::new(utc_ms(date, time))
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// The agent's civil date and minute-of-day at instant `now`.
pub fn local_now(now: Ms, utc_offset_minutes: i32) -> (NaiveDate, Minutes) {
    let utc = DateTime::from_timestamp_millis(now).unwrap_or_default();
    let local = utc.naive_utc() + Duration::minutes(utc_offset_minutes as i64);
    let minute = local.hour() * 60 + local.minute();
    (local.date(), minute)
}

/// Unix ms for `date` + `time` interpreted as UTC.
pub fn utc_ms(date: NaiveDate, time: Minutes) -> Ms {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    (midnight + Duration::minutes(time as i64)).and_utc().timestamp_millis()
}

/// Unix ms for `date` + `time` in a civil time `utc_offset_minutes` from UTC.
pub fn local_to_ms(date: NaiveDate, time: Minutes, utc_offset_minutes: i32) -> Ms {
    utc_ms(date, time) - utc_offset_minutes as Ms * 60_000
}
