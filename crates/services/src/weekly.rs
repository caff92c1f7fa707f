use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use practice_core::model::{ArchivedWeek, UserId, UserProgress, WeekRollover};
use practice_core::time::Clock;
use practice_core::week::{DayBucket, week_total};
use storage::repository::UserProgressRepository;

use crate::error::ProgressError;

pub use practice_core::week::{format_weekly_data, is_current_week};

/// The seven chart buckets of the current week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyView {
    pub days: [DayBucket; 7],
    pub total_minutes: u32,
}

impl WeeklyView {
    #[must_use]
    pub fn from_progress(progress: &UserProgress, now: DateTime<Utc>) -> Self {
        let days = format_weekly_data(&progress.weekly_progress, now);
        Self {
            total_minutes: week_total(&days),
            days,
        }
    }
}

/// Keeps the weekly chart scoped to the current calendar week.
pub struct WeeklyAggregator {
    clock: Clock,
    users: Arc<dyn UserProgressRepository>,
}

impl WeeklyAggregator {
    #[must_use]
    pub fn new(clock: Clock, users: Arc<dyn UserProgressRepository>) -> Self {
        Self { clock, users }
    }

    /// Archive entries from past weeks once a new week has begun.
    ///
    /// `snapshot` is the caller's copy of the user document; it is updated in
    /// place and written back whole. Two sessions running this at once can
    /// both archive the same week.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the updated document cannot be stored.
    pub async fn handle_weekly_reset(
        &self,
        user_id: &UserId,
        snapshot: &mut UserProgress,
    ) -> Result<Vec<ArchivedWeek>, ProgressError> {
        let rollover = snapshot.roll_week(self.clock.now());
        if !rollover.is_dirty() {
            return Ok(Vec::new());
        }

        self.users.put_user_progress(user_id, snapshot).await?;
        match rollover {
            WeekRollover::Archived(weeks) => {
                for week in &weeks {
                    info!(
                        user = %user_id,
                        week_ending = %week.week_ending,
                        entries = week.progress.len(),
                        "weekly progress archived"
                    );
                }
                Ok(weeks)
            }
            WeekRollover::Current | WeekRollover::Stamped => Ok(Vec::new()),
        }
    }

    /// Current week's chart for a user; a missing document reads as empty.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the document cannot be read.
    pub async fn weekly_view(&self, user_id: &UserId) -> Result<WeeklyView, ProgressError> {
        let progress = self
            .users
            .get_user_progress(user_id)
            .await?
            .unwrap_or_default();
        Ok(WeeklyView::from_progress(&progress, self.clock.now()))
    }
}
