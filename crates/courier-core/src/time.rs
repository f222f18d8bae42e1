//! Clock abstraction for testable timing decisions.
//!
//! Retry scheduling and cleanup cutoffs depend on "now". Injecting the clock
//! lets tests pin or advance time deterministically instead of sleeping.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Source of the current wall-clock time.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`] to control
/// retry eligibility and backoff offsets exactly.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock with controllable time progression.
///
/// Stores the current time as milliseconds since the UNIX epoch so clones
/// share the same timeline.
#[derive(Debug, Clone)]
pub struct TestClock {
    epoch_millis: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock pinned to a specific start time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { epoch_millis: Arc::new(AtomicI64::new(start.timestamp_millis())) }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        self.epoch_millis.fetch_add(duration.num_milliseconds(), Ordering::AcqRel);
    }

    /// Jumps the clock to a specific time.
    pub fn jump_to(&self, time: DateTime<Utc>) {
        self.epoch_millis.store(time.timestamp_millis(), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let millis = self.epoch_millis.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = TestClock::starting_at(start);

        clock.advance(Duration::minutes(5));

        assert_eq!(clock.now_utc(), start + Duration::minutes(5));
    }

    #[test]
    fn test_clock_jump() {
        let clock = TestClock::new();
        let target = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        clock.jump_to(target);

        assert_eq!(clock.now_utc(), target);
    }

    #[test]
    fn clones_share_the_same_timeline() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = TestClock::starting_at(start);
        let other = clock.clone();

        clock.advance(Duration::hours(1));

        assert_eq!(other.now_utc(), start + Duration::hours(1));
    }
}
