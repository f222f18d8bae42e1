//! Retry scheduling over a fixed escalating backoff table.
//!
//! The schedule is a pure mapping from attempt number to wait duration, kept
//! separate from the lifecycle manager so the strategy can be swapped
//! without touching delivery logic. No jitter is applied: offsets are exact.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Escalating wait times in minutes, indexed by `attempt_count - 1`.
pub const DEFAULT_BACKOFF_MINUTES: [i64; 7] = [1, 5, 15, 30, 60, 120, 240];

/// Backoff strategy mapping attempt numbers to retry times.
///
/// Attempts are 1-indexed; attempts past the end of the table clamp to the
/// last entry, so long-failing events settle into a steady 4-hour cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySchedule {
    minutes: Vec<i64>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self { minutes: DEFAULT_BACKOFF_MINUTES.to_vec() }
    }
}

impl RetrySchedule {
    /// Creates a schedule over a custom minute table.
    ///
    /// An empty table falls back to the default.
    pub fn new(minutes: Vec<i64>) -> Self {
        if minutes.is_empty() {
            return Self::default();
        }
        Self { minutes }
    }

    /// Wait duration before the retry following the given attempt.
    pub fn delay_after(&self, attempt_count: i32) -> Duration {
        let index = usize::try_from(attempt_count.max(1) - 1)
            .unwrap_or(0)
            .min(self.minutes.len() - 1);

        Duration::minutes(self.minutes[index])
    }

    /// Timestamp at which the retry following the given attempt becomes
    /// eligible.
    pub fn next_retry_at(&self, attempt_count: i32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_after(attempt_count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn delays_follow_the_escalating_table() {
        let schedule = RetrySchedule::default();

        let expected = [1, 5, 15, 30, 60, 120, 240];
        for (attempt, minutes) in (1..=7).zip(expected) {
            assert_eq!(schedule.delay_after(attempt), Duration::minutes(minutes));
        }
    }

    #[test]
    fn attempts_past_the_table_clamp_to_the_last_entry() {
        let schedule = RetrySchedule::default();

        assert_eq!(schedule.delay_after(8), Duration::minutes(240));
        assert_eq!(schedule.delay_after(100), Duration::minutes(240));
    }

    #[test]
    fn next_retry_is_an_exact_offset_from_now() {
        let schedule = RetrySchedule::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        assert_eq!(schedule.next_retry_at(1, now), now + Duration::minutes(1));
        assert_eq!(schedule.next_retry_at(3, now), now + Duration::minutes(15));
    }

    #[test]
    fn zero_and_negative_attempts_use_the_first_entry() {
        let schedule = RetrySchedule::default();

        assert_eq!(schedule.delay_after(0), Duration::minutes(1));
        assert_eq!(schedule.delay_after(-3), Duration::minutes(1));
    }

    #[test]
    fn custom_tables_are_honoured_and_empty_tables_rejected() {
        let custom = RetrySchedule::new(vec![2, 10]);
        assert_eq!(custom.delay_after(1), Duration::minutes(2));
        assert_eq!(custom.delay_after(5), Duration::minutes(10));

        let fallback = RetrySchedule::new(Vec::new());
        assert_eq!(fallback, RetrySchedule::default());
    }
}
