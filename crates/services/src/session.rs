use std::sync::Arc;

use tracing::{info, warn};

use practice_core::model::{ChatMessage, LessonKey, LessonProgress, OperationId, UserId};
use practice_core::time::Clock;
use practice_core::timer::TimerThreshold;
use storage::repository::CommitOutcome;
use storage::snapshot::{LessonSnapshot, SnapshotKind, SnapshotStore};

use crate::error::ProgressError;
use crate::timer::TimerDriver;
use crate::tracker::LessonProgressTracker;

//
// ─── OUTCOME ───────────────────────────────────────────────────────────────────
//

/// Where a finished or abandoned session ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Written to the progress store.
    Saved,
    /// The store already held this completion.
    AlreadySaved,
    /// The store rejected the write; a local snapshot keeps the session.
    SavedLocally,
    /// Neither the store nor the snapshot store accepted the session.
    Lost,
    /// The lesson is still locked; nothing was recorded.
    Refused,
    /// A pending local completion was written to the store instead.
    Replayed,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One open lesson chat.
pub struct LessonSession {
    user_id: UserId,
    key: LessonKey,
    operation_id: OperationId,
    messages: Vec<ChatMessage>,
    timer: TimerDriver,
}

impl LessonSession {
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn key(&self) -> LessonKey {
        self.key
    }

    /// Id used for this session's completion; retries reuse it.
    #[must_use]
    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        self.timer.elapsed_secs()
    }

    #[must_use]
    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Resolves with the elapsed seconds once the lesson threshold passes.
    ///
    /// Returns `None` if the timer never started, was stopped, or the signal
    /// was already consumed.
    pub async fn threshold_reached(&mut self) -> Option<u64> {
        let rx = self.timer.take_threshold()?;
        rx.await.ok()
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Runs lesson chats against the tracker and keeps a local copy when the
/// store cannot be reached.
pub struct LessonSessionService {
    clock: Clock,
    tracker: Arc<LessonProgressTracker>,
    snapshots: Arc<dyn SnapshotStore>,
    threshold: TimerThreshold,
}

impl LessonSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        tracker: Arc<LessonProgressTracker>,
        snapshots: Arc<dyn SnapshotStore>,
        threshold: TimerThreshold,
    ) -> Self {
        Self {
            clock,
            tracker,
            snapshots,
            threshold,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> TimerThreshold {
        self.threshold
    }

    /// Initialize and start a lesson, resuming its stored transcript.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Lesson` if the lesson is locked, or
    /// `ProgressError::Storage` if the store cannot be reached.
    pub async fn open(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<LessonSession, ProgressError> {
        let is_first = self.tracker.roadmap().starts_unlocked(key);
        self.tracker.initialize(user_id, key, is_first).await?;
        let lesson: LessonProgress = self.tracker.begin_session(user_id, key).await?;

        Ok(LessonSession {
            user_id: user_id.clone(),
            key,
            operation_id: OperationId::new(),
            messages: lesson.messages().to_vec(),
            timer: TimerDriver::new(self.threshold),
        })
    }

    /// Record a message; the first participant message starts the timer.
    ///
    /// Returns whether the message reached the store. The session keeps the
    /// message either way.
    pub async fn post_message(&self, session: &mut LessonSession, message: ChatMessage) -> bool {
        let stored = self
            .tracker
            .record_message(&session.user_id, session.key, &message)
            .await;
        session.timer.start_on(&message);
        session.messages.push(message);
        stored
    }

    /// Finish the lesson and unlock the next one.
    pub async fn complete(&self, mut session: LessonSession) -> SessionOutcome {
        let duration_secs = session.timer.stop();
        let result = self
            .tracker
            .complete_with_operation(
                session.operation_id,
                &session.user_id,
                session.key,
                duration_secs,
                session.messages.clone(),
            )
            .await;

        match result {
            Ok(CommitOutcome::Applied { .. }) => SessionOutcome::Saved,
            Ok(CommitOutcome::AlreadyApplied) => SessionOutcome::AlreadySaved,
            Ok(CommitOutcome::Locked) => SessionOutcome::Refused,
            Err(ProgressError::Lesson(error)) => {
                warn!(user = %session.user_id, lesson = %session.key, %error, "completion refused");
                SessionOutcome::Refused
            }
            Err(error) => {
                warn!(user = %session.user_id, lesson = %session.key, %error, "completion kept locally");
                let kind = SnapshotKind::Completion {
                    operation_id: session.operation_id,
                };
                self.keep_locally(session, kind, duration_secs).await
            }
        }
    }

    /// Leave the lesson before completing it.
    pub async fn exit(&self, mut session: LessonSession) -> SessionOutcome {
        let duration_secs = session.timer.stop();
        let saved = self
            .tracker
            .save_partial_progress(
                &session.user_id,
                session.key,
                duration_secs,
                session.messages.clone(),
            )
            .await;
        if saved {
            return SessionOutcome::Saved;
        }
        self.keep_locally(session, SnapshotKind::Partial, duration_secs)
            .await
    }

    /// Complete a lesson outside a chat, keeping its stored transcript.
    ///
    /// A pending completion snapshot of the lesson is replayed and stands in
    /// for this completion. A pending partial snapshot is replayed first.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Lesson` if the lesson is locked, or
    /// `ProgressError::Storage` if the store rejects the snapshot or the
    /// completion.
    pub async fn complete_lesson(
        &self,
        user_id: &UserId,
        key: LessonKey,
        duration_secs: u64,
    ) -> Result<SessionOutcome, ProgressError> {
        if let Some(snapshot) = self.recover(user_id, key).await? {
            if matches!(snapshot.kind, SnapshotKind::Completion { .. }) {
                return Ok(SessionOutcome::Replayed);
            }
        }

        let messages = self
            .tracker
            .lesson(user_id, key)
            .await?
            .map(|lesson| lesson.messages().to_vec())
            .unwrap_or_default();
        let outcome = self
            .tracker
            .complete_with_operation(OperationId::new(), user_id, key, duration_secs, messages)
            .await?;
        Ok(match outcome {
            CommitOutcome::Applied { .. } => SessionOutcome::Saved,
            CommitOutcome::AlreadyApplied => SessionOutcome::AlreadySaved,
            CommitOutcome::Locked => SessionOutcome::Refused,
        })
    }

    /// Replay a pending local snapshot of a lesson into the store.
    ///
    /// The snapshot is removed once the store accepted it. Returns the
    /// replayed snapshot, or `None` when nothing was pending.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Storage` if the snapshot cannot be read or the
    /// store still rejects it; the snapshot is kept in that case.
    pub async fn recover(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<Option<LessonSnapshot>, ProgressError> {
        let Some(snapshot) = self.snapshots.load_snapshot(user_id, key).await? else {
            return Ok(None);
        };

        match snapshot.kind {
            SnapshotKind::Partial => {
                self.tracker
                    .persist_partial_progress(
                        user_id,
                        key,
                        snapshot.duration_secs,
                        snapshot.messages.clone(),
                    )
                    .await?;
            }
            SnapshotKind::Completion { operation_id } => {
                self.tracker
                    .complete_with_operation(
                        operation_id,
                        user_id,
                        key,
                        snapshot.duration_secs,
                        snapshot.messages.clone(),
                    )
                    .await?;
            }
        }

        self.snapshots.remove_snapshot(user_id, key).await?;
        info!(user = %user_id, lesson = %key, "local snapshot replayed");
        Ok(Some(snapshot))
    }

    async fn keep_locally(
        &self,
        session: LessonSession,
        kind: SnapshotKind,
        duration_secs: u64,
    ) -> SessionOutcome {
        let snapshot = LessonSnapshot {
            user_id: session.user_id,
            lesson: session.key,
            kind,
            duration_secs,
            messages: session.messages,
            saved_at: self.clock.now(),
        };
        match self.snapshots.save_snapshot(&snapshot).await {
            Ok(()) => SessionOutcome::SavedLocally,
            Err(error) => {
                warn!(user = %snapshot.user_id, lesson = %snapshot.lesson, %error, "session progress lost");
                SessionOutcome::Lost
            }
        }
    }
}
