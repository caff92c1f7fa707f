use std::sync::Arc;

use tracing::info;

use practice_core::model::{SessionRecord, UserId, UserProgress, whole_minutes};
use practice_core::time::Clock;
use practice_core::timer::TimerThreshold;
use storage::repository::UserProgressRepository;

use crate::error::ProgressError;
use crate::timer::TimerDriver;

/// Voice and free-chat sessions that are not tied to a lesson.
pub struct PracticeService {
    clock: Clock,
    users: Arc<dyn UserProgressRepository>,
    threshold: TimerThreshold,
}

impl PracticeService {
    #[must_use]
    pub fn new(
        clock: Clock,
        users: Arc<dyn UserProgressRepository>,
        threshold: TimerThreshold,
    ) -> Self {
        Self {
            clock,
            users,
            threshold,
        }
    }

    /// Idle timer for a new practice conversation.
    #[must_use]
    pub fn timer(&self) -> TimerDriver {
        TimerDriver::new(self.threshold)
    }

    /// Fold a finished practice session into the user totals.
    ///
    /// Returns the updated aggregates, or `None` for an empty session, which
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the aggregates cannot be updated.
    pub async fn complete_practice(
        &self,
        user_id: &UserId,
        duration_secs: u64,
    ) -> Result<Option<UserProgress>, ProgressError> {
        if duration_secs == 0 {
            return Ok(None);
        }

        let minutes = whole_minutes(duration_secs);
        let record = SessionRecord::practice(minutes, self.clock.now());
        let progress = self.users.record_session(user_id, &record).await?;
        info!(
            user = %user_id,
            minutes,
            sessions = progress.sessions_completed,
            "practice session recorded"
        );
        Ok(Some(progress))
    }
}
