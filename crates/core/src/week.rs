//! Calendar-week math for the weekly progress chart.
//!
//! Weeks start on Monday 00:00 UTC and end on the following Sunday 23:59:59.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::Serialize;

use crate::model::WeeklyEntry;

/// Chart order of the seven buckets.
pub const WEEK_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Minutes practiced on one weekday of the current week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub day: Weekday,
    pub minutes: u32,
}

/// Monday 00:00 of the week containing `now`.
#[must_use]
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let monday = week_start_date(now.date_naive());
    monday.and_time(NaiveTime::MIN).and_utc()
}

/// Monday of the week containing `date`.
#[must_use]
pub fn week_start_date(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Returns true iff `date` falls between Monday 00:00 and Sunday 23:59:59 of
/// the week containing `now`.
#[must_use]
pub fn is_current_week(date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let start = week_start(now);
    let end = start + Duration::days(7);
    date >= start && date < end
}

/// Folds weekly entries into seven buckets, Monday first.
///
/// Only entries whose timestamp falls in the current week count; days
/// without entries report zero.
#[must_use]
pub fn format_weekly_data(entries: &[WeeklyEntry], now: DateTime<Utc>) -> [DayBucket; 7] {
    let mut buckets = WEEK_DAYS.map(|day| DayBucket { day, minutes: 0 });
    for entry in entries {
        if !is_current_week(entry.timestamp, now) {
            continue;
        }
        let idx = entry.timestamp.weekday().num_days_from_monday() as usize;
        buckets[idx].minutes = buckets[idx].minutes.saturating_add(entry.minutes);
    }
    buckets
}

/// Sum of all buckets.
#[must_use]
pub fn week_total(buckets: &[DayBucket]) -> u32 {
    buckets
        .iter()
        .fold(0_u32, |acc, bucket| acc.saturating_add(bucket.minutes))
}
