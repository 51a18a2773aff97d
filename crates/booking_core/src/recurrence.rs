//! crates/booking_core/src/recurrence.rs
//!
//! Expands one requested slot plus a weekday recurrence into the concrete
//! intervals that have to be booked.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::domain::Interval;
use crate::weekdays::DayOfWeek;

/// The recurring series implied by a first slot `[start, end)`, the weekdays it
/// repeats on, and the last day it may repeat on.
///
/// Calendar days are walked in the timezone of `start`, and every occurrence
/// keeps the wall-clock time of `start`. The walk includes the last day.
#[derive(Debug, Clone)]
pub struct Recurrence<Tz: TimeZone> {
    start: DateTime<Tz>,
    duration: Duration,
    last_day: NaiveDate,
    repeat_on: DayOfWeek,
}

impl<Tz: TimeZone> Recurrence<Tz> {
    /// `end - start` must be positive; callers validate this upstream.
    /// Without `end_repeating_on` the walk stops on the day of `end`.
    pub fn new(
        start: DateTime<Tz>,
        end: DateTime<Tz>,
        end_repeating_on: Option<DateTime<Tz>>,
        repeat_on: DayOfWeek,
    ) -> Self {
        let duration = end.clone() - start.clone();
        debug_assert!(duration > Duration::zero(), "recurrence needs a positive duration");
        let limit = end_repeating_on.unwrap_or(end);
        let last_day = limit.with_timezone(&start.timezone()).date_naive();
        Self {
            start,
            duration,
            last_day,
            repeat_on,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Yields the occurrences in strictly increasing order. Each call starts a
    /// fresh walk from the first day.
    pub fn iter(&self) -> impl Iterator<Item = Interval> + '_ {
        let first_day = self.start.date_naive();
        let time_of_day = self.start.time();
        let tz = self.start.timezone();

        first_day
            .iter_days()
            .take_while(move |day| *day <= self.last_day)
            .filter(move |day| *day == first_day || self.repeat_on.contains(DayOfWeek::of(day)))
            .filter_map(move |day| {
                let start = if day == first_day {
                    self.start.clone()
                } else {
                    // A wall-clock time skipped by a DST change has no occurrence.
                    tz.from_local_datetime(&day.and_time(time_of_day)).earliest()?
                };
                let end = start.clone() + self.duration;
                Some(Interval::new(start.with_timezone(&Utc), end.with_timezone(&Utc)))
            })
    }
}

/// Convenience wrapper collecting every occurrence of a [`Recurrence`].
pub fn generate<Tz: TimeZone>(
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    end_repeating_on: Option<DateTime<Tz>>,
    repeat_on: DayOfWeek,
) -> Vec<Interval> {
    Recurrence::new(start, end, end_repeating_on, repeat_on)
        .iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, FixedOffset};

    fn pacific() -> FixedOffset {
        FixedOffset::west_opt(8 * 3600).unwrap()
    }

    // 2015-01-04 is a Sunday.
    fn sunday_ten() -> DateTime<FixedOffset> {
        pacific().with_ymd_and_hms(2015, 1, 4, 10, 0, 0).unwrap()
    }

    fn mon_wed() -> DayOfWeek {
        DayOfWeek::MONDAY | DayOfWeek::WEDNESDAY
    }

    #[test]
    fn no_recurrence_yields_exactly_the_request() {
        let start = sunday_ten();
        let end = start + Duration::hours(1);
        let intervals = generate(start, end, None, DayOfWeek::NONE);
        assert_eq!(intervals, vec![Interval::new(start.with_timezone(&Utc), end.with_timezone(&Utc))]);
    }

    #[test]
    fn repeat_end_without_days_still_yields_one() {
        let start = sunday_ten();
        let end = start + Duration::hours(1);
        let intervals = generate(start, end, Some(start + Duration::days(20)), DayOfWeek::NONE);
        assert_eq!(intervals.len(), 1);
    }

    #[test]
    fn monday_wednesday_for_two_weeks() {
        let start = sunday_ten();
        let end = start + Duration::hours(1);
        let until = pacific().with_ymd_and_hms(2015, 1, 18, 0, 0, 0).unwrap();
        let intervals = generate(start, end, Some(until), mon_wed());

        assert_eq!(intervals.len(), 5);
        let last = intervals.last().unwrap();
        assert_eq!(last.start, (start + Duration::days(10)).with_timezone(&Utc));
        assert_eq!(last.end, (start + Duration::days(10) + Duration::hours(1)).with_timezone(&Utc));
    }

    #[test]
    fn repeat_end_before_first_wednesday() {
        let start = sunday_ten();
        let end = start + Duration::hours(1);
        let until = pacific().with_ymd_and_hms(2015, 1, 6, 0, 0, 0).unwrap();
        let intervals = generate(start, end, Some(until), mon_wed());

        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].start, start.with_timezone(&Utc));
        assert_eq!(intervals[1].start, (start + Duration::days(1)).with_timezone(&Utc));
        assert_eq!(intervals[1].end, (start + Duration::days(1) + Duration::hours(1)).with_timezone(&Utc));
    }

    #[test]
    fn last_day_is_included() {
        let start = sunday_ten();
        let end = start + Duration::hours(1);
        // Wednesday 2015-01-07 at midnight, i.e. before the 10:00 occurrence.
        let until = pacific().with_ymd_and_hms(2015, 1, 7, 0, 0, 0).unwrap();
        let intervals = generate(start, end, Some(until), mon_wed());
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[2].start.with_timezone(&pacific()).day(), 7);
    }

    #[test]
    fn every_occurrence_is_the_first_day_or_a_repeat_day() {
        let start = sunday_ten();
        let end = start + Duration::minutes(90);
        let repeat_on = DayOfWeek::TUESDAY | DayOfWeek::FRIDAY | DayOfWeek::SATURDAY;
        let until = start + Duration::days(60);
        let intervals = generate(start, end, Some(until), repeat_on);

        assert!(intervals.len() > 1);
        for interval in &intervals {
            let local = interval.start.with_timezone(&pacific());
            assert!(local == start || repeat_on.contains(DayOfWeek::of(&local)));
            assert_eq!(interval.duration(), Duration::minutes(90));
        }
        assert!(intervals.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn walk_uses_the_start_timezone() {
        // 23:30 Pacific on Sunday is already Monday in UTC; only Pacific
        // Mondays may repeat.
        let start = pacific().with_ymd_and_hms(2015, 1, 4, 23, 30, 0).unwrap();
        let end = start + Duration::minutes(30);
        let until = start + Duration::days(7);
        let intervals = generate(start, end, Some(until), DayOfWeek::MONDAY);

        assert_eq!(intervals.len(), 2);
        let second = intervals[1].start.with_timezone(&pacific());
        assert_eq!(second.weekday(), chrono::Weekday::Mon);
        assert_eq!(second.time(), start.time());
    }

    #[test]
    fn iter_restarts_from_scratch() {
        let start = sunday_ten();
        let recurrence = Recurrence::new(start, start + Duration::hours(1), Some(start + Duration::days(14)), mon_wed());
        let first: Vec<_> = recurrence.iter().collect();
        let second: Vec<_> = recurrence.iter().collect();
        assert_eq!(first, second);
        assert_eq!(recurrence.iter().take(2).count(), 2);
    }
}
