use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::LessonKey;
use crate::model::message::ChatMessage;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("lesson {0} is locked")]
    Locked(LessonKey),

    #[error("inconsistent persisted lesson state: {0}")]
    InvalidPersistedState(String),
}

//
// ─── PHASE ─────────────────────────────────────────────────────────────────────
//

/// Where a lesson sits in its lifecycle.
///
/// Phases only move forward: `Locked → Unlocked → Started → Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LessonPhase {
    Locked,
    Unlocked,
    Started,
    Completed,
}

//
// ─── LESSON PROGRESS ───────────────────────────────────────────────────────────
//

/// Per-user progress document for one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonProgress {
    key: LessonKey,
    unlocked: bool,
    started: bool,
    completed: bool,
    minutes_spent: u32,
    messages: Vec<ChatMessage>,
    last_attempt: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    unlocked_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    /// Creates the document for a lesson visited for the first time.
    #[must_use]
    pub fn new(key: LessonKey, unlocked: bool, now: DateTime<Utc>) -> Self {
        Self {
            key,
            unlocked,
            started: false,
            completed: false,
            minutes_spent: 0,
            messages: Vec::new(),
            last_attempt: None,
            completed_at: None,
            unlocked_at: unlocked.then_some(now),
        }
    }

    /// Rehydrate a lesson document from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::InvalidPersistedState` if the flags contradict each
    /// other (a completed lesson must have been started and unlocked).
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn from_persisted(
        key: LessonKey,
        unlocked: bool,
        started: bool,
        completed: bool,
        minutes_spent: u32,
        messages: Vec<ChatMessage>,
        last_attempt: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        unlocked_at: Option<DateTime<Utc>>,
    ) -> Result<Self, LessonError> {
        if completed && !unlocked {
            return Err(LessonError::InvalidPersistedState(format!(
                "lesson {key} completed while locked"
            )));
        }
        if completed && completed_at.is_none() {
            return Err(LessonError::InvalidPersistedState(format!(
                "lesson {key} completed without timestamp"
            )));
        }

        Ok(Self {
            key,
            unlocked,
            started,
            completed,
            minutes_spent,
            messages,
            last_attempt,
            completed_at,
            unlocked_at,
        })
    }

    #[must_use]
    pub fn key(&self) -> LessonKey {
        self.key
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn minutes_spent(&self) -> u32 {
        self.minutes_spent
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        self.unlocked_at
    }

    #[must_use]
    pub fn phase(&self) -> LessonPhase {
        if self.completed {
            LessonPhase::Completed
        } else if self.started {
            LessonPhase::Started
        } else if self.unlocked {
            LessonPhase::Unlocked
        } else {
            LessonPhase::Locked
        }
    }

    /// Unlocks the lesson. Keeps the first unlock timestamp.
    pub fn unlock(&mut self, now: DateTime<Utc>) {
        if !self.unlocked {
            self.unlocked = true;
            self.unlocked_at = Some(now);
        }
    }

    /// Marks the lesson as started and stamps the attempt.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::Locked` if the lesson has not been unlocked yet.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), LessonError> {
        if !self.unlocked {
            return Err(LessonError::Locked(self.key));
        }
        self.started = true;
        self.last_attempt = Some(now);
        Ok(())
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Adds minutes from an interrupted session and replaces the transcript.
    ///
    /// Never touches the completion state.
    pub fn record_partial(&mut self, minutes: u32, messages: Vec<ChatMessage>, now: DateTime<Utc>) {
        self.minutes_spent = self.minutes_spent.saturating_add(minutes);
        self.messages = messages;
        self.last_attempt = Some(now);
    }

    /// Marks the lesson completed, adding the session minutes and storing the
    /// full transcript.
    ///
    /// Returns `true` when this call moved the lesson into `Completed`, `false`
    /// when it was already completed (a revisit).
    ///
    /// # Errors
    ///
    /// Returns `LessonError::Locked` if the lesson has not been unlocked yet.
    pub fn complete(
        &mut self,
        minutes: u32,
        messages: Vec<ChatMessage>,
        now: DateTime<Utc>,
    ) -> Result<bool, LessonError> {
        if !self.unlocked {
            return Err(LessonError::Locked(self.key));
        }
        self.started = true;
        self.minutes_spent = self.minutes_spent.saturating_add(minutes);
        self.messages = messages;
        self.last_attempt = Some(now);
        if self.completed {
            return Ok(false);
        }
        self.completed = true;
        self.completed_at = Some(now);
        Ok(true)
    }
}

/// Whole minutes in a duration given in seconds, rounded down.
#[must_use]
pub fn whole_minutes(duration_secs: u64) -> u32 {
    u32::try_from(duration_secs / 60).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn key() -> LessonKey {
        LessonKey::from_raw(1, 2)
    }

    #[test]
    fn new_locked_lesson_cannot_start() {
        let mut lesson = LessonProgress::new(key(), false, fixed_now());
        assert_eq!(lesson.phase(), LessonPhase::Locked);
        assert_eq!(lesson.unlocked_at(), None);
        assert_eq!(lesson.start(fixed_now()), Err(LessonError::Locked(key())));
        assert!(!lesson.is_started());
    }

    #[test]
    fn phases_move_forward() {
        let now = fixed_now();
        let mut lesson = LessonProgress::new(key(), false, now);
        lesson.unlock(now);
        assert_eq!(lesson.phase(), LessonPhase::Unlocked);
        lesson.start(now).unwrap();
        assert_eq!(lesson.phase(), LessonPhase::Started);
        assert!(lesson.complete(15, Vec::new(), now).unwrap());
        assert_eq!(lesson.phase(), LessonPhase::Completed);

        lesson.record_partial(3, Vec::new(), now);
        assert_eq!(lesson.phase(), LessonPhase::Completed);
        lesson.start(now).unwrap();
        assert_eq!(lesson.phase(), LessonPhase::Completed);
    }

    #[test]
    fn revisit_completion_keeps_original_timestamp() {
        let first = fixed_now();
        let later = first + Duration::days(2);
        let mut lesson = LessonProgress::new(key(), true, first);

        assert!(lesson.complete(16, vec![ChatMessage::user("hi", first)], first).unwrap());
        assert!(!lesson.complete(20, Vec::new(), later).unwrap());

        assert_eq!(lesson.completed_at(), Some(first));
        assert_eq!(lesson.last_attempt(), Some(later));
        assert_eq!(lesson.minutes_spent(), 36);
        assert!(lesson.messages().is_empty());
    }

    #[test]
    fn locked_lesson_cannot_be_completed() {
        let mut lesson = LessonProgress::new(key(), false, fixed_now());
        assert_eq!(
            lesson.complete(15, Vec::new(), fixed_now()),
            Err(LessonError::Locked(key()))
        );
        assert_eq!(lesson.phase(), LessonPhase::Locked);
        assert_eq!(lesson.minutes_spent(), 0);
    }

    #[test]
    fn unlock_keeps_first_timestamp() {
        let first = fixed_now();
        let mut lesson = LessonProgress::new(key(), true, first);
        lesson.unlock(first + Duration::hours(1));
        assert_eq!(lesson.unlocked_at(), Some(first));
    }

    #[test]
    fn from_persisted_rejects_completed_locked_lesson() {
        let err = LessonProgress::from_persisted(
            key(),
            false,
            true,
            true,
            5,
            Vec::new(),
            None,
            Some(fixed_now()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LessonError::InvalidPersistedState(_)));
    }

    #[test]
    fn whole_minutes_rounds_down() {
        assert_eq!(whole_minutes(0), 0);
        assert_eq!(whole_minutes(59), 0);
        assert_eq!(whole_minutes(60), 1);
        assert_eq!(whole_minutes(899), 14);
        assert_eq!(whole_minutes(900), 15);
    }
}
