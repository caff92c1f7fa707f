use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// Derived statistics shown under the contribution graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContributionStats {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total: u64,
    /// Mean count over active days, one decimal place.
    pub average: f64,
}

impl ContributionStats {
    /// Computes streaks and totals from a per-day activity log.
    ///
    /// `current_streak` counts consecutive active days ending on `today`, so it
    /// is zero when nothing was recorded today. `longest_streak` ignores entries
    /// dated after `today`.
    #[must_use]
    pub fn from_log(log: &BTreeMap<NaiveDate, u32>, today: NaiveDate) -> Self {
        let total: u64 = log.values().map(|&count| u64::from(count)).sum();
        let active_days = log.values().filter(|&&count| count > 0).count();

        Self {
            current_streak: current_streak(log, today),
            longest_streak: longest_streak(log, today),
            total,
            average: average(total, active_days),
        }
    }
}

fn is_active(log: &BTreeMap<NaiveDate, u32>, day: NaiveDate) -> bool {
    log.get(&day).is_some_and(|&count| count > 0)
}

fn current_streak(log: &BTreeMap<NaiveDate, u32>, today: NaiveDate) -> u32 {
    let mut streak = 0_u32;
    let mut day = today;
    while is_active(log, day) {
        streak += 1;
        let Some(prev) = day.pred_opt() else {
            break;
        };
        day = prev;
    }
    streak
}

fn longest_streak(log: &BTreeMap<NaiveDate, u32>, today: NaiveDate) -> u32 {
    let mut longest = 0_u32;
    let mut run = 0_u32;
    let mut prev: Option<NaiveDate> = None;

    for (&day, &count) in log.range(..=today) {
        if count == 0 {
            run = 0;
            prev = None;
            continue;
        }
        run = match prev {
            Some(p) if day - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }

    longest
}

#[allow(clippy::cast_precision_loss)]
fn average(total: u64, active_days: usize) -> f64 {
    if active_days == 0 {
        return 0.0;
    }
    let raw = total as f64 / active_days as f64;
    (raw * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn log(entries: &[(&str, u32)]) -> BTreeMap<NaiveDate, u32> {
        entries.iter().map(|(d, c)| (day(d), *c)).collect()
    }

    #[test]
    fn streaks_break_on_zero_days() {
        let log = log(&[
            ("2024-01-01", 1),
            ("2024-01-02", 1),
            ("2024-01-03", 0),
            ("2024-01-04", 1),
        ]);
        let stats = ContributionStats::from_log(&log, day("2024-01-04"));
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.longest_streak, 2);
        assert_eq!(stats.total, 3);
        assert!((stats.average - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_days_break_runs_too() {
        let log = log(&[("2024-01-01", 2), ("2024-01-03", 1), ("2024-01-04", 4)]);
        let stats = ContributionStats::from_log(&log, day("2024-01-04"));
        assert_eq!(stats.current_streak, 2);
        assert_eq!(stats.longest_streak, 2);
    }

    #[test]
    fn current_streak_is_zero_without_activity_today() {
        let log = log(&[("2024-01-02", 1), ("2024-01-03", 1)]);
        let stats = ContributionStats::from_log(&log, day("2024-01-04"));
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 2);
    }

    #[test]
    fn future_days_are_ignored_for_longest_streak() {
        let log = log(&[
            ("2024-01-04", 1),
            ("2024-01-05", 1),
            ("2024-01-06", 1),
            ("2024-01-07", 1),
        ]);
        let stats = ContributionStats::from_log(&log, day("2024-01-04"));
        assert_eq!(stats.longest_streak, 1);
        assert_eq!(stats.current_streak, 1);
        assert_eq!(stats.total, 4);
    }

    #[test]
    fn average_is_rounded_to_one_decimal() {
        let log = log(&[("2024-01-01", 1), ("2024-01-02", 1), ("2024-01-03", 2)]);
        let stats = ContributionStats::from_log(&log, day("2024-01-03"));
        assert!((stats.average - 1.3).abs() < 1e-9);
    }

    #[test]
    fn empty_log_yields_zeroes() {
        let stats = ContributionStats::from_log(&BTreeMap::new(), day("2024-01-04"));
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.longest_streak, 0);
        assert_eq!(stats.total, 0);
        assert!(stats.average.abs() < f64::EPSILON);
    }
}
