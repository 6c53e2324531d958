//! Utility helpers for SafeSurf.
//!
//! Time is read through the [`Clock`] trait so that cache expiry and
//! evaluation timestamps can be driven deterministically in tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of wall-clock time for the cache and the tab store.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by `chrono::Utc::now`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.  Cloning shares the same instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance_ms(&self, ms: i64) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard += Duration::milliseconds(ms);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *guard = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Milliseconds elapsed between two instants, clamped at zero when the clock
/// went backwards.
pub fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let before = other.now();
        clock.advance_ms(1_500);
        assert_eq!(elapsed_ms(before, other.now()), 1_500);
    }

    #[test]
    fn elapsed_ms_never_negative() {
        let clock = ManualClock::default();
        let later = clock.now() + Duration::seconds(5);
        assert_eq!(elapsed_ms(later, clock.now()), 0);
    }
}
