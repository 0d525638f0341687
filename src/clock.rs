//! Time source for every "decision at an instant".
//!
//! The generator, the payload store and the rate limiter never read the
//! system time themselves; they take instants from a [`Clock`] so tests can
//! drive them with a [`ManualClock`].

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never goes backwards.
///
/// Readings are clamped to the last value handed out, so a system clock
/// step backwards cannot reopen a rate-limit window or resurrect an
/// expired component ID.
#[derive(Debug)]
pub struct SystemClock {
    last: Mutex<DateTime<Utc>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { last: Mutex::new(DateTime::UNIX_EPOCH) }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now().max(*last);
        *last = now;
        now
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Clock frozen at the Unix epoch, so test instants read as offsets.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Render `target` relative to `now` for user-facing messages,
/// e.g. `"in 5 seconds"`, `"in 2 minutes"`, `"now"`.
pub fn format_relative(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = target - now;
    if delta <= TimeDelta::zero() {
        return "now".to_string();
    }

    // Round up: "in 0 seconds" would be a lie for any positive delta.
    let secs = (delta.num_milliseconds() + 999) / 1000;
    let (amount, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        ((secs + 59) / 60, "minute")
    } else if secs < 86_400 {
        ((secs + 3599) / 3600, "hour")
    } else {
        ((secs + 86_399) / 86_400, "day")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("in {amount} {unit}{plural}")
}
