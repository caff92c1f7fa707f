use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::week::{week_start, week_start_date};

//
// ─── WEEKLY ENTRIES ────────────────────────────────────────────────────────────
//

/// Minutes from one finished session, tagged for week bucketing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyEntry {
    pub day: Weekday,
    pub minutes: u32,
    pub timestamp: DateTime<Utc>,
}

impl WeeklyEntry {
    /// Builds an entry whose weekday label is derived from `timestamp`.
    #[must_use]
    pub fn new(minutes: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            day: timestamp.weekday(),
            minutes,
            timestamp,
        }
    }
}

/// Entries moved out of the live chart when a new week began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedWeek {
    pub week_ending: NaiveDate,
    pub progress: Vec<WeeklyEntry>,
}

//
// ─── SESSION RECORD ────────────────────────────────────────────────────────────
//

/// One finished practice session, ready to be folded into the user aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub minutes: u32,
    pub recorded_at: DateTime<Utc>,
    /// Set when the session moved a lesson into `Completed` for the first time.
    pub completes_lesson: bool,
}

impl SessionRecord {
    #[must_use]
    pub fn practice(minutes: u32, recorded_at: DateTime<Utc>) -> Self {
        Self {
            minutes,
            recorded_at,
            completes_lesson: false,
        }
    }

    #[must_use]
    pub fn lesson(minutes: u32, recorded_at: DateTime<Utc>, completes_lesson: bool) -> Self {
        Self {
            minutes,
            recorded_at,
            completes_lesson,
        }
    }
}

//
// ─── WEEK ROLLOVER ─────────────────────────────────────────────────────────────
//

/// Outcome of checking the weekly chart against the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeekRollover {
    /// The chart already belongs to the current week.
    Current,
    /// Only the reset stamp was written; no entry predates the current week.
    Stamped,
    /// Entries from past weeks were archived, oldest week first.
    Archived(Vec<ArchivedWeek>),
}

impl WeekRollover {
    /// True when the document changed and needs to be written back.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !matches!(self, Self::Current)
    }
}

//
// ─── USER PROGRESS ─────────────────────────────────────────────────────────────
//

/// Per-user aggregate statistics.
///
/// `activity_log` counts finished sessions per calendar day and feeds the
/// contribution graph.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProgress {
    pub total_minutes: u32,
    pub sessions_completed: u32,
    pub lessons_completed: u32,
    pub last_active_day: Option<NaiveDate>,
    pub activity_log: BTreeMap<NaiveDate, u32>,
    pub weekly_progress: Vec<WeeklyEntry>,
    pub archived_progress: Vec<ArchivedWeek>,
    pub last_week_reset: Option<DateTime<Utc>>,
}

impl UserProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a finished session into the aggregates.
    pub fn record_session(&mut self, record: &SessionRecord) {
        let day = record.recorded_at.date_naive();
        self.total_minutes = self.total_minutes.saturating_add(record.minutes);
        self.sessions_completed = self.sessions_completed.saturating_add(1);
        if record.completes_lesson {
            self.lessons_completed = self.lessons_completed.saturating_add(1);
        }
        let count = self.activity_log.entry(day).or_insert(0);
        *count = count.saturating_add(1);
        self.weekly_progress
            .push(WeeklyEntry::new(record.minutes, record.recorded_at));
        self.last_active_day = Some(self.last_active_day.map_or(day, |prev| prev.max(day)));
    }

    /// True when the chart still holds data from before the current week.
    #[must_use]
    pub fn needs_week_reset(&self, now: DateTime<Utc>) -> bool {
        match self.last_week_reset {
            Some(last) => last < week_start(now),
            None => true,
        }
    }

    /// Moves entries recorded before the current week into the archive.
    ///
    /// Stale entries are grouped per calendar week; each group ends on the
    /// Sunday of its own week. Entries from the current week stay live.
    pub fn roll_week(&mut self, now: DateTime<Utc>) -> WeekRollover {
        if !self.needs_week_reset(now) {
            return WeekRollover::Current;
        }
        self.last_week_reset = Some(now);

        let start = week_start(now);
        let (stale, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.weekly_progress)
            .into_iter()
            .partition(|entry| entry.timestamp < start);
        self.weekly_progress = live;
        if stale.is_empty() {
            return WeekRollover::Stamped;
        }

        let mut by_week: BTreeMap<NaiveDate, Vec<WeeklyEntry>> = BTreeMap::new();
        for entry in stale {
            let monday = week_start_date(entry.timestamp.date_naive());
            by_week.entry(monday).or_default().push(entry);
        }
        let weeks: Vec<ArchivedWeek> = by_week
            .into_iter()
            .map(|(monday, progress)| ArchivedWeek {
                week_ending: monday + Duration::days(6),
                progress,
            })
            .collect();
        self.archived_progress.extend(weeks.iter().cloned());
        WeekRollover::Archived(weeks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::utc;

    #[test]
    fn record_session_updates_every_aggregate() {
        let mut progress = UserProgress::new();
        let at = utc(2024, 1, 10, 9, 0, 0);

        progress.record_session(&SessionRecord::lesson(16, at, true));
        progress.record_session(&SessionRecord::practice(4, at));

        assert_eq!(progress.total_minutes, 20);
        assert_eq!(progress.sessions_completed, 2);
        assert_eq!(progress.lessons_completed, 1);
        assert_eq!(progress.activity_log.get(&at.date_naive()), Some(&2));
        assert_eq!(progress.weekly_progress.len(), 2);
        assert_eq!(progress.weekly_progress[0].day, Weekday::Wed);
        assert_eq!(progress.last_active_day, Some(at.date_naive()));
    }

    #[test]
    fn last_active_day_never_moves_backwards() {
        let mut progress = UserProgress::new();
        progress.record_session(&SessionRecord::practice(1, utc(2024, 1, 10, 9, 0, 0)));
        progress.record_session(&SessionRecord::practice(1, utc(2024, 1, 9, 9, 0, 0)));
        assert_eq!(
            progress.last_active_day,
            NaiveDate::from_ymd_opt(2024, 1, 10)
        );
    }

    #[test]
    fn reset_archives_when_stamp_predates_this_monday() {
        // last Monday minus one second, checked on this Monday morning
        let this_monday = utc(2024, 1, 15, 9, 0, 0);
        let mut progress = UserProgress {
            last_week_reset: Some(utc(2024, 1, 7, 23, 59, 59)),
            ..UserProgress::default()
        };
        progress.record_session(&SessionRecord::practice(10, utc(2024, 1, 9, 8, 0, 0)));

        let WeekRollover::Archived(weeks) = progress.roll_week(this_monday) else {
            panic!("expected an archived week");
        };
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].week_ending, NaiveDate::from_ymd_opt(2024, 1, 14).unwrap());
        assert_eq!(weeks[0].progress.len(), 1);
        assert!(progress.weekly_progress.is_empty());
        assert_eq!(progress.archived_progress.len(), 1);
        assert_eq!(progress.last_week_reset, Some(this_monday));
    }

    #[test]
    fn stale_stamp_without_old_entries_only_restamps() {
        let this_monday = utc(2024, 1, 15, 9, 0, 0);
        let mut progress = UserProgress {
            last_week_reset: Some(utc(2024, 1, 8, 0, 0, 0) - Duration::seconds(1)),
            ..UserProgress::default()
        };

        assert_eq!(progress.roll_week(this_monday), WeekRollover::Stamped);
        assert!(progress.archived_progress.is_empty());
        assert_eq!(progress.last_week_reset, Some(this_monday));
    }

    #[test]
    fn first_check_keeps_this_weeks_entries_live() {
        let now = utc(2024, 1, 10, 9, 0, 0);
        let mut progress = UserProgress::new();
        progress.record_session(&SessionRecord::lesson(20, utc(2024, 1, 10, 8, 0, 0), true));

        assert_eq!(progress.roll_week(now), WeekRollover::Stamped);
        assert_eq!(progress.weekly_progress.len(), 1);
        assert!(progress.archived_progress.is_empty());
        assert_eq!(progress.last_week_reset, Some(now));
    }

    #[test]
    fn only_entries_from_past_weeks_are_archived() {
        let now = utc(2024, 1, 15, 12, 0, 0);
        let mut progress = UserProgress {
            last_week_reset: Some(utc(2024, 1, 8, 0, 0, 0)),
            ..UserProgress::default()
        };
        progress.record_session(&SessionRecord::practice(10, utc(2024, 1, 9, 8, 0, 0)));
        progress.record_session(&SessionRecord::practice(5, utc(2024, 1, 15, 10, 0, 0)));

        let WeekRollover::Archived(weeks) = progress.roll_week(now) else {
            panic!("expected an archived week");
        };
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].progress[0].minutes, 10);
        assert_eq!(progress.weekly_progress.len(), 1);
        assert_eq!(progress.weekly_progress[0].minutes, 5);
    }

    #[test]
    fn idle_weeks_are_labelled_by_their_own_sunday() {
        let mut progress = UserProgress {
            last_week_reset: Some(utc(2023, 12, 4, 0, 0, 0)),
            ..UserProgress::default()
        };
        progress.record_session(&SessionRecord::practice(3, utc(2023, 12, 5, 8, 0, 0)));
        progress.record_session(&SessionRecord::practice(7, utc(2023, 12, 20, 8, 0, 0)));

        let WeekRollover::Archived(weeks) = progress.roll_week(utc(2024, 1, 15, 9, 0, 0)) else {
            panic!("expected archived weeks");
        };
        let endings: Vec<_> = weeks.iter().map(|week| week.week_ending).collect();
        assert_eq!(
            endings,
            vec![
                NaiveDate::from_ymd_opt(2023, 12, 10).unwrap(),
                NaiveDate::from_ymd_opt(2023, 12, 24).unwrap(),
            ]
        );
        assert!(progress.weekly_progress.is_empty());
    }

    #[test]
    fn reset_is_a_no_op_within_the_same_week() {
        let mut progress = UserProgress {
            last_week_reset: Some(utc(2024, 1, 8, 0, 0, 0)),
            ..UserProgress::default()
        };
        assert_eq!(progress.roll_week(utc(2024, 1, 14, 23, 59, 59)), WeekRollover::Current);
        assert!(progress.archived_progress.is_empty());
    }

    #[test]
    fn first_check_on_fresh_user_only_stamps() {
        let now = utc(2024, 1, 10, 9, 0, 0);
        let mut progress = UserProgress::new();
        let rollover = progress.roll_week(now);
        assert_eq!(rollover, WeekRollover::Stamped);
        assert!(rollover.is_dirty());
        assert!(progress.archived_progress.is_empty());
        assert_eq!(progress.last_week_reset, Some(now));
    }
}
