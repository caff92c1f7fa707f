use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use practice_core::model::{
    ChapterId, ChatMessage, LessonError, LessonKey, LessonProgress, OperationId, Roadmap, UserId,
    whole_minutes,
};
use practice_core::time::Clock;
use storage::repository::{
    CommitOutcome, CompletionCommit, CompletionRepository, LessonProgressRepository,
};

use crate::error::ProgressError;

/// Unlock, start, and completion bookkeeping for lesson documents.
///
/// The soft operations (`start_session`, `record_message`,
/// `complete_and_unlock_next`, `save_partial_progress`) log storage failures
/// and report them as `false` or not at all. Their `Result` counterparts are
/// public for callers that need the error.
pub struct LessonProgressTracker {
    clock: Clock,
    roadmap: Roadmap,
    lessons: Arc<dyn LessonProgressRepository>,
    completions: Arc<dyn CompletionRepository>,
}

impl LessonProgressTracker {
    #[must_use]
    pub fn new(
        clock: Clock,
        roadmap: Roadmap,
        lessons: Arc<dyn LessonProgressRepository>,
        completions: Arc<dyn CompletionRepository>,
    ) -> Self {
        Self {
            clock,
            roadmap,
            lessons,
            completions,
        }
    }

    #[must_use]
    pub fn roadmap(&self) -> &Roadmap {
        &self.roadmap
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Stored document of a lesson, if it was ever visited.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the document cannot be read.
    pub async fn lesson(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<Option<LessonProgress>, ProgressError> {
        Ok(self.lessons.get_lesson(user_id, key).await?)
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Create the lesson document on first visit.
    ///
    /// The lesson starts unlocked when it is the first lesson or when the
    /// lesson before it is already completed. An existing document is
    /// returned untouched and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the document cannot be read or created.
    pub async fn initialize(
        &self,
        user_id: &UserId,
        key: LessonKey,
        is_first_lesson: bool,
    ) -> Result<LessonProgress, ProgressError> {
        if let Some(existing) = self.lessons.get_lesson(user_id, key).await? {
            return Ok(existing);
        }

        let fresh = self.fresh_lesson(user_id, key, is_first_lesson).await?;
        let stored = self.lessons.insert_lesson_if_absent(user_id, &fresh).await?;
        debug!(user = %user_id, lesson = %key, unlocked = stored.is_unlocked(), "lesson initialized");
        Ok(stored)
    }

    /// Mark the lesson started and stamp the attempt, logging any failure.
    pub async fn start_session(&self, user_id: &UserId, key: LessonKey) {
        if let Err(error) = self.begin_session(user_id, key).await {
            warn!(user = %user_id, lesson = %key, %error, "could not start lesson session");
        }
    }

    /// Mark the lesson started, creating its document if it is missing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Lesson` if the lesson is still locked, or
    /// `ProgressError::Storage` if the document cannot be read or written.
    pub async fn begin_session(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<LessonProgress, ProgressError> {
        let mut lesson = match self.lessons.get_lesson(user_id, key).await? {
            Some(lesson) => lesson,
            None => {
                self.fresh_lesson(user_id, key, self.roadmap.starts_unlocked(key))
                    .await?
            }
        };
        lesson.start(self.clock.now())?;
        self.lessons.upsert_lesson(user_id, &lesson).await?;
        Ok(lesson)
    }

    /// Append one chat message to the stored transcript.
    pub async fn record_message(
        &self,
        user_id: &UserId,
        key: LessonKey,
        message: &ChatMessage,
    ) -> bool {
        match self.lessons.append_message(user_id, key, message).await {
            Ok(()) => true,
            Err(error) => {
                warn!(user = %user_id, lesson = %key, %error, "could not record chat message");
                false
            }
        }
    }

    //
    // ─── COMPLETION ────────────────────────────────────────────────────────────
    //

    /// Complete the lesson, unlock the next one, and update the user totals.
    ///
    /// Returns `false` when the store rejected the completion.
    pub async fn complete_and_unlock_next(
        &self,
        user_id: &UserId,
        key: LessonKey,
        duration_secs: u64,
        messages: Vec<ChatMessage>,
    ) -> bool {
        let operation_id = OperationId::new();
        match self
            .complete_with_operation(operation_id, user_id, key, duration_secs, messages)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                warn!(user = %user_id, lesson = %key, %error, "lesson completion not saved");
                false
            }
        }
    }

    /// Apply a lesson completion as one unit keyed by `operation_id`.
    ///
    /// Retrying with the same id after a failure is safe; a completion that
    /// already reached the store reports `CommitOutcome::AlreadyApplied`.
    /// A lesson never visited counts as unlocked only when the roadmap opens
    /// it or its predecessor is completed.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Lesson` if the lesson is locked, or
    /// `ProgressError::Storage` if the commit cannot be applied.
    pub async fn complete_with_operation(
        &self,
        operation_id: OperationId,
        user_id: &UserId,
        key: LessonKey,
        duration_secs: u64,
        messages: Vec<ChatMessage>,
    ) -> Result<CommitOutcome, ProgressError> {
        let commit = CompletionCommit {
            operation_id,
            user_id: user_id.clone(),
            lesson: key,
            duration_secs,
            messages,
            next: self.roadmap.next_after(key),
            unlocked_if_missing: self.roadmap.starts_unlocked(key)
                || self.previous_completed(user_id, key).await?,
            completed_at: self.clock.now(),
        };

        let outcome = self.completions.commit_completion(&commit).await?;
        match outcome {
            CommitOutcome::Applied {
                first_completion,
                next_created,
            } => info!(
                user = %user_id,
                lesson = %key,
                minutes = whole_minutes(duration_secs),
                first_completion,
                next_created,
                "lesson completed"
            ),
            CommitOutcome::AlreadyApplied => {
                debug!(user = %user_id, lesson = %key, operation = %operation_id, "completion already applied");
            }
            CommitOutcome::Locked => return Err(LessonError::Locked(key).into()),
        }
        Ok(outcome)
    }

    //
    // ─── PARTIAL PROGRESS ──────────────────────────────────────────────────────
    //

    /// Keep the minutes and transcript of a session left before completion.
    ///
    /// A zero duration writes nothing and counts as saved.
    pub async fn save_partial_progress(
        &self,
        user_id: &UserId,
        key: LessonKey,
        duration_secs: u64,
        messages: Vec<ChatMessage>,
    ) -> bool {
        match self
            .persist_partial_progress(user_id, key, duration_secs, messages)
            .await
        {
            Ok(_) => true,
            Err(error) => {
                warn!(user = %user_id, lesson = %key, %error, "partial progress not saved");
                false
            }
        }
    }

    /// Store partial progress, returning whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the document cannot be read or written.
    pub async fn persist_partial_progress(
        &self,
        user_id: &UserId,
        key: LessonKey,
        duration_secs: u64,
        messages: Vec<ChatMessage>,
    ) -> Result<bool, ProgressError> {
        if duration_secs == 0 {
            debug!(user = %user_id, lesson = %key, "empty session, nothing to save");
            return Ok(false);
        }

        let mut lesson = match self.lessons.get_lesson(user_id, key).await? {
            Some(lesson) => lesson,
            None => {
                self.fresh_lesson(user_id, key, self.roadmap.starts_unlocked(key))
                    .await?
            }
        };
        let minutes = whole_minutes(duration_secs);
        lesson.record_partial(minutes, messages, self.clock.now());
        self.lessons.upsert_lesson(user_id, &lesson).await?;
        debug!(user = %user_id, lesson = %key, minutes, "partial progress saved");
        Ok(true)
    }

    //
    // ─── ROADMAP ───────────────────────────────────────────────────────────────
    //

    /// Lesson documents of a chapter for the roadmap screen.
    ///
    /// When the chapter size is known, lessons never visited appear as
    /// placeholders that are locked unless they open the roadmap.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the chapter cannot be listed.
    pub async fn chapter_overview(
        &self,
        user_id: &UserId,
        chapter: ChapterId,
    ) -> Result<Vec<LessonProgress>, ProgressError> {
        let stored = self.lessons.list_chapter_lessons(user_id, chapter).await?;
        let keys = self.roadmap.chapter_lessons(chapter);
        if keys.is_empty() {
            return Ok(stored);
        }

        let now = self.clock.now();
        let overview = keys
            .into_iter()
            .map(|key| {
                stored
                    .iter()
                    .find(|lesson| lesson.key() == key)
                    .cloned()
                    .unwrap_or_else(|| LessonProgress::new(key, self.roadmap.starts_unlocked(key), now))
            })
            .collect();
        Ok(overview)
    }

    async fn fresh_lesson(
        &self,
        user_id: &UserId,
        key: LessonKey,
        is_first_lesson: bool,
    ) -> Result<LessonProgress, ProgressError> {
        let unlocked = is_first_lesson || self.previous_completed(user_id, key).await?;
        Ok(LessonProgress::new(key, unlocked, self.clock.now()))
    }

    async fn previous_completed(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<bool, ProgressError> {
        let Some(previous) = self.roadmap.previous(key) else {
            return Ok(false);
        };
        Ok(self
            .lessons
            .get_lesson(user_id, previous)
            .await?
            .is_some_and(|lesson| lesson.is_completed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use practice_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, UserProgressRepository};

    fn tracker(repo: &InMemoryRepository, roadmap: Roadmap) -> LessonProgressTracker {
        LessonProgressTracker::new(
            fixed_clock(),
            roadmap,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    fn learner() -> UserId {
        UserId::new("learner")
    }

    #[tokio::test]
    async fn second_lesson_unlocks_once_first_is_completed() {
        let repo = InMemoryRepository::new();
        let tracker = tracker(&repo, Roadmap::unbounded());
        let second = LessonKey::from_raw(1, 2);

        let locked = tracker.initialize(&learner(), second, false).await.unwrap();
        assert!(!locked.is_unlocked());

        let other = UserId::new("other");
        let now = tracker.now();
        let mut first = LessonProgress::new(LessonKey::from_raw(1, 1), true, now);
        first.complete(1, Vec::new(), now).unwrap();
        repo.upsert_lesson(&other, &first).await.unwrap();

        let fresh = tracker.initialize(&other, second, false).await.unwrap();
        assert!(fresh.is_unlocked());
    }

    #[tokio::test]
    async fn locked_lesson_is_not_started() {
        let repo = InMemoryRepository::new();
        let tracker = tracker(&repo, Roadmap::unbounded());
        let key = LessonKey::from_raw(3, 4);

        let err = tracker.begin_session(&learner(), key).await.unwrap_err();
        assert!(matches!(err, ProgressError::Lesson(_)));

        tracker.start_session(&learner(), key).await;
        assert!(repo.get_lesson(&learner(), key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revisiting_a_completed_lesson_adds_minutes_only() {
        let repo = InMemoryRepository::new();
        let tracker = tracker(&repo, Roadmap::unbounded());
        let key = LessonKey::from_raw(1, 1);

        assert!(tracker.complete_and_unlock_next(&learner(), key, 900, Vec::new()).await);
        assert!(tracker.complete_and_unlock_next(&learner(), key, 300, Vec::new()).await);

        let lesson = repo.get_lesson(&learner(), key).await.unwrap().unwrap();
        assert_eq!(lesson.minutes_spent(), 20);
        let user = repo.get_user_progress(&learner()).await.unwrap().unwrap();
        assert_eq!(user.lessons_completed, 1);
        assert_eq!(user.sessions_completed, 2);
        assert_eq!(user.total_minutes, 20);
    }

    #[tokio::test]
    async fn last_roadmap_lesson_unlocks_nothing() {
        let repo = InMemoryRepository::new();
        let tracker = tracker(&repo, Roadmap::new(vec![2]).unwrap());
        let last = LessonKey::from_raw(1, 2);
        assert!(
            tracker
                .complete_and_unlock_next(&learner(), LessonKey::from_raw(1, 1), 60, Vec::new())
                .await
        );

        let outcome = tracker
            .complete_with_operation(OperationId::new(), &learner(), last, 120, Vec::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Applied {
                first_completion: true,
                next_created: false,
            }
        );
        assert!(repo
            .list_chapter_lessons(&learner(), ChapterId::new(2))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn locked_lesson_is_not_completed() {
        let repo = InMemoryRepository::new();
        let tracker = tracker(&repo, Roadmap::new(vec![5]).unwrap());
        let locked = LessonKey::from_raw(1, 4);
        tracker.initialize(&learner(), locked, false).await.unwrap();

        let err = tracker
            .complete_with_operation(OperationId::new(), &learner(), locked, 900, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::Lesson(LessonError::Locked(_))));
        assert!(!tracker.complete_and_unlock_next(&learner(), locked, 900, Vec::new()).await);

        let stored = repo.get_lesson(&learner(), locked).await.unwrap().unwrap();
        assert!(!stored.is_unlocked());
        assert!(repo.get_lesson(&learner(), LessonKey::from_raw(1, 5)).await.unwrap().is_none());
        assert!(repo.get_user_progress(&learner()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unvisited_lesson_completes_once_its_predecessor_is_done() {
        let repo = InMemoryRepository::new();
        let tracker = tracker(&repo, Roadmap::new(vec![3]).unwrap());
        let second = LessonKey::from_raw(1, 2);
        let third = LessonKey::from_raw(1, 3);

        assert!(!tracker.complete_and_unlock_next(&learner(), third, 60, Vec::new()).await);
        assert!(repo.get_lesson(&learner(), third).await.unwrap().is_none());

        let now = tracker.now();
        let mut done = LessonProgress::new(second, true, now);
        done.complete(1, Vec::new(), now).unwrap();
        repo.upsert_lesson(&learner(), &done).await.unwrap();

        assert!(tracker.complete_and_unlock_next(&learner(), third, 60, Vec::new()).await);
        let stored = repo.get_lesson(&learner(), third).await.unwrap().unwrap();
        assert!(stored.is_completed());
    }
}
