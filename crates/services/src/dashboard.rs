use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;

use practice_core::ContributionStats;
use practice_core::model::{UserId, UserProgress};
use practice_core::time::Clock;
use storage::repository::UserProgressRepository;

use crate::error::ProgressError;
use crate::weekly::{WeeklyAggregator, WeeklyView};

/// Everything the progress page shows for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub week: WeeklyView,
    pub contributions: ContributionStats,
    pub total_minutes: u32,
    pub sessions_completed: u32,
    pub lessons_completed: u32,
    pub last_active_day: Option<NaiveDate>,
    pub archived_weeks: usize,
}

impl DashboardView {
    /// Derive the view from a user document. Pure; call it on every update.
    #[must_use]
    pub fn from_progress(progress: &UserProgress, now: DateTime<Utc>) -> Self {
        Self {
            week: WeeklyView::from_progress(progress, now),
            contributions: ContributionStats::from_log(&progress.activity_log, now.date_naive()),
            total_minutes: progress.total_minutes,
            sessions_completed: progress.sessions_completed,
            lessons_completed: progress.lessons_completed,
            last_active_day: progress.last_active_day,
            archived_weeks: progress.archived_progress.len(),
        }
    }
}

pub struct DashboardService {
    clock: Clock,
    users: Arc<dyn UserProgressRepository>,
    weekly: Arc<WeeklyAggregator>,
}

impl DashboardService {
    #[must_use]
    pub fn new(
        clock: Clock,
        users: Arc<dyn UserProgressRepository>,
        weekly: Arc<WeeklyAggregator>,
    ) -> Self {
        Self {
            clock,
            users,
            weekly,
        }
    }

    /// Load the user's progress, rolling the week over first when needed.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the document cannot be read or the
    /// weekly reset cannot be stored.
    pub async fn load(&self, user_id: &UserId) -> Result<DashboardView, ProgressError> {
        let mut progress = self
            .users
            .get_user_progress(user_id)
            .await?
            .unwrap_or_default();
        self.weekly
            .handle_weekly_reset(user_id, &mut progress)
            .await?;
        Ok(DashboardView::from_progress(&progress, self.clock.now()))
    }

    /// Live updates of the user document.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the subscription cannot be opened.
    pub async fn watch(
        &self,
        user_id: &UserId,
    ) -> Result<watch::Receiver<Option<UserProgress>>, ProgressError> {
        Ok(self.users.subscribe(user_id).await?)
    }
}
