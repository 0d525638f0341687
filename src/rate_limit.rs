//! Sliding-window request admission.
//!
//! A [`RateLimiter`] remembers the instants of its last `capacity`
//! admissions. A request at `now` is admitted when fewer than `capacity`
//! of those fall inside `(now - window, now]`.
//!
//! [`KeyedRateLimiter`] keeps one window per key (e.g. per user) and drops
//! idle windows so the map does not grow without bound.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

/// Number of tracked keys above which [`KeyedRateLimiter`] prunes idle ones.
const KEYED_PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug)]
pub struct RateLimiter {
    window: TimeDelta,
    capacity: NonZeroUsize,
    uses: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(window: TimeDelta, capacity: NonZeroUsize) -> Self {
        Self {
            window,
            capacity,
            uses: Mutex::new(VecDeque::with_capacity(capacity.get())),
        }
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Admit a request at `now`, recording it on success.
    pub fn allow(&self, now: DateTime<Utc>) -> bool {
        let mut uses = self.uses.lock().unwrap_or_else(PoisonError::into_inner);
        Self::admit(&mut uses, self.window, self.capacity.get(), now)
    }

    /// Earliest instant at which [`allow`](Self::allow) would succeed,
    /// assuming no admissions in between. Returns `now` when a request
    /// would be admitted immediately.
    pub fn next_allowed(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let uses = self.uses.lock().unwrap_or_else(PoisonError::into_inner);
        Self::next_slot(&uses, self.window, self.capacity.get(), now)
    }

    fn admit(
        uses: &mut VecDeque<DateTime<Utc>>,
        window: TimeDelta,
        capacity: usize,
        now: DateTime<Utc>,
    ) -> bool {
        while uses.front().is_some_and(|&oldest| Self::window_ended(oldest, window, now)) {
            uses.pop_front();
        }
        if uses.len() >= capacity {
            return false;
        }
        uses.push_back(now);
        true
    }

    fn next_slot(
        uses: &VecDeque<DateTime<Utc>>,
        window: TimeDelta,
        capacity: usize,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match uses.front() {
            Some(&oldest) if uses.len() >= capacity && !Self::window_ended(oldest, window, now) => {
                oldest
                    .checked_add_signed(window)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            _ => now,
        }
    }

    /// True once an admission at `at` no longer counts against `now`.
    /// A window reaching past the last representable instant never ends.
    fn window_ended(at: DateTime<Utc>, window: TimeDelta, now: DateTime<Utc>) -> bool {
        at.checked_add_signed(window).is_some_and(|end| end <= now)
    }

    /// True when every recorded admission has left the window.
    fn is_idle(uses: &VecDeque<DateTime<Utc>>, window: TimeDelta, now: DateTime<Utc>) -> bool {
        uses.back().is_none_or(|&newest| Self::window_ended(newest, window, now))
    }
}

/// One sliding window per key, sharing window length and capacity.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    window: TimeDelta,
    capacity: NonZeroUsize,
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl KeyedRateLimiter {
    pub fn new(window: TimeDelta, capacity: NonZeroUsize) -> Self {
        Self {
            window,
            capacity,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() >= KEYED_PRUNE_THRESHOLD {
            windows.retain(|_, uses| !RateLimiter::is_idle(uses, self.window, now));
        }
        let uses = windows
            .entry(key.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.get()));
        RateLimiter::admit(uses, self.window, self.capacity.get(), now)
    }

    pub fn next_allowed(&self, key: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        match windows.get(key) {
            Some(uses) => RateLimiter::next_slot(uses, self.window, self.capacity.get(), now),
            None => now,
        }
    }

    /// Drop windows with no admissions left inside them.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, uses| !RateLimiter::is_idle(uses, self.window, now));
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
