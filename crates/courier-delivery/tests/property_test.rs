//! Property tests for the backoff schedule.

use chrono::{Duration, TimeZone, Utc};
use courier_delivery::backoff::{RetrySchedule, DEFAULT_BACKOFF_MINUTES};
use proptest::prelude::*;

proptest! {
    #[test]
    fn delay_is_always_within_the_table_bounds(attempt in 1i32..10_000) {
        let schedule = RetrySchedule::default();
        let delay = schedule.delay_after(attempt);

        prop_assert!(delay >= Duration::minutes(DEFAULT_BACKOFF_MINUTES[0]));
        prop_assert!(
            delay <= Duration::minutes(*DEFAULT_BACKOFF_MINUTES.last().unwrap())
        );
    }

    #[test]
    fn delay_never_decreases_with_attempt_number(attempt in 1i32..1_000) {
        let schedule = RetrySchedule::default();

        prop_assert!(schedule.delay_after(attempt + 1) >= schedule.delay_after(attempt));
    }

    #[test]
    fn next_retry_is_now_plus_the_delay(
        attempt in 1i32..100,
        offset_minutes in 0i64..(365 * 24 * 60),
    ) {
        let schedule = RetrySchedule::default();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
            + Duration::minutes(offset_minutes);

        prop_assert_eq!(
            schedule.next_retry_at(attempt, now),
            now + schedule.delay_after(attempt)
        );
    }

    #[test]
    fn custom_tables_clamp_to_their_last_entry(
        minutes in prop::collection::vec(1i64..1_000, 1..10),
        attempt in 1i32..100,
    ) {
        let schedule = RetrySchedule::new(minutes.clone());
        let index = usize::try_from(attempt - 1).unwrap().min(minutes.len() - 1);

        prop_assert_eq!(schedule.delay_after(attempt), Duration::minutes(minutes[index]));
    }
}
