use async_trait::async_trait;
use chrono::{DateTime, Utc};
use practice_core::model::{
    ChapterId, ChatMessage, LessonError, LessonKey, LessonProgress, OperationId, SessionRecord,
    UserId, UserProgress, whole_minutes,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;

use crate::subscriptions::Subscriptions;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── COMPLETION COMMIT ─────────────────────────────────────────────────────────
//

/// The three writes that finish a lesson, applied as one unit.
///
/// Backends remember `operation_id`; replaying the same commit is reported as
/// `CommitOutcome::AlreadyApplied` and changes nothing.
#[derive(Debug, Clone)]
pub struct CompletionCommit {
    pub operation_id: OperationId,
    pub user_id: UserId,
    pub lesson: LessonKey,
    pub duration_secs: u64,
    pub messages: Vec<ChatMessage>,
    pub next: Option<LessonKey>,
    /// Unlock state for `lesson` when it has no stored document yet.
    pub unlocked_if_missing: bool,
    pub completed_at: DateTime<Utc>,
}

/// Documents produced by applying a `CompletionCommit`.
#[derive(Debug, Clone)]
pub struct CompletionDocs {
    pub lesson: LessonProgress,
    pub next: Option<LessonProgress>,
    pub user: UserProgress,
    pub first_completion: bool,
    pub next_created: bool,
}

impl CompletionCommit {
    /// Applies the commit to the current state of the three documents.
    ///
    /// Missing documents are created with defaults. The next lesson ends up
    /// unlocked whether it existed before or not.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::Locked` if the lesson being completed is locked;
    /// nothing should be written in that case.
    pub fn apply(
        &self,
        current: Option<LessonProgress>,
        next: Option<LessonProgress>,
        user: Option<UserProgress>,
    ) -> Result<CompletionDocs, LessonError> {
        let at = self.completed_at;
        let minutes = whole_minutes(self.duration_secs);

        let mut lesson = current
            .unwrap_or_else(|| LessonProgress::new(self.lesson, self.unlocked_if_missing, at));
        let first_completion = lesson.complete(minutes, self.messages.clone(), at)?;

        let next_created = self.next.is_some() && next.is_none();
        let next = self.next.map(|key| {
            let mut doc = next.unwrap_or_else(|| LessonProgress::new(key, true, at));
            doc.unlock(at);
            doc
        });

        let mut user = user.unwrap_or_default();
        user.record_session(&SessionRecord::lesson(minutes, at, first_completion));

        Ok(CompletionDocs {
            lesson,
            next,
            user,
            first_completion,
            next_created,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied {
        first_completion: bool,
        next_created: bool,
    },
    AlreadyApplied,
    /// The lesson is still locked; nothing was written.
    Locked,
}

//
// ─── REPOSITORY CONTRACTS ──────────────────────────────────────────────────────
//

/// Repository contract for per-lesson progress documents.
#[async_trait]
pub trait LessonProgressRepository: Send + Sync {
    /// Fetch a lesson document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing document is `Ok(None)`.
    async fn get_lesson(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<Option<LessonProgress>, StorageError>;

    /// Persist or replace a lesson document.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document cannot be stored.
    async fn upsert_lesson(
        &self,
        user_id: &UserId,
        lesson: &LessonProgress,
    ) -> Result<(), StorageError>;

    /// Store `lesson` unless a document already exists, returning whichever is stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn insert_lesson_if_absent(
        &self,
        user_id: &UserId,
        lesson: &LessonProgress,
    ) -> Result<LessonProgress, StorageError>;

    /// Append one message to a lesson transcript.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson document does not exist.
    async fn append_message(
        &self,
        user_id: &UserId,
        key: LessonKey,
        message: &ChatMessage,
    ) -> Result<(), StorageError>;

    /// All stored lesson documents of a chapter, ordered by lesson id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_chapter_lessons(
        &self,
        user_id: &UserId,
        chapter: ChapterId,
    ) -> Result<Vec<LessonProgress>, StorageError>;
}

/// Repository contract for user-level aggregates.
#[async_trait]
pub trait UserProgressRepository: Send + Sync {
    /// Fetch the aggregate document for a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing document is `Ok(None)`.
    async fn get_user_progress(&self, user_id: &UserId)
    -> Result<Option<UserProgress>, StorageError>;

    /// Replace the aggregate document (last write wins).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document cannot be stored.
    async fn put_user_progress(
        &self,
        user_id: &UserId,
        progress: &UserProgress,
    ) -> Result<(), StorageError>;

    /// Fold a finished session into the aggregates in a single backend step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the update cannot be applied.
    async fn record_session(
        &self,
        user_id: &UserId,
        record: &SessionRecord,
    ) -> Result<UserProgress, StorageError>;

    /// Live view of the user's aggregates, seeded with the stored value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the initial read fails.
    async fn subscribe(
        &self,
        user_id: &UserId,
    ) -> Result<watch::Receiver<Option<UserProgress>>, StorageError>;
}

/// Repository contract for the lesson-completion unit of work.
#[async_trait]
pub trait CompletionRepository: Send + Sync {
    /// Apply a completion commit atomically and idempotently.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the commit cannot be applied; nothing is
    /// written in that case.
    async fn commit_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StorageError>;
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct MemoryState {
    lessons: HashMap<(UserId, LessonKey), LessonProgress>,
    users: HashMap<UserId, UserProgress>,
    operations: HashSet<OperationId>,
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Counts successful writes and can be switched to read-only to simulate a
/// store that rejects writes.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
    writes: Arc<AtomicUsize>,
    read_only: Arc<AtomicBool>,
    subscriptions: Subscriptions,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write operations applied so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Reject every subsequent write with `StorageError::PermissionDenied`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn begin_write(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::PermissionDenied(
                "store is read-only".into(),
            ));
        }
        self.lock()
    }

    fn finish_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LessonProgressRepository for InMemoryRepository {
    async fn get_lesson(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.lessons.get(&(user_id.clone(), key)).cloned())
    }

    async fn upsert_lesson(
        &self,
        user_id: &UserId,
        lesson: &LessonProgress,
    ) -> Result<(), StorageError> {
        let mut guard = self.begin_write()?;
        guard
            .lessons
            .insert((user_id.clone(), lesson.key()), lesson.clone());
        self.finish_write();
        Ok(())
    }

    async fn insert_lesson_if_absent(
        &self,
        user_id: &UserId,
        lesson: &LessonProgress,
    ) -> Result<LessonProgress, StorageError> {
        let id = (user_id.clone(), lesson.key());
        {
            let guard = self.lock()?;
            if let Some(existing) = guard.lessons.get(&id) {
                return Ok(existing.clone());
            }
        }

        let mut guard = self.begin_write()?;
        let stored = guard.lessons.entry(id).or_insert_with(|| lesson.clone()).clone();
        self.finish_write();
        Ok(stored)
    }

    async fn append_message(
        &self,
        user_id: &UserId,
        key: LessonKey,
        message: &ChatMessage,
    ) -> Result<(), StorageError> {
        let mut guard = self.begin_write()?;
        let lesson = guard
            .lessons
            .get_mut(&(user_id.clone(), key))
            .ok_or(StorageError::NotFound)?;
        lesson.push_message(message.clone());
        self.finish_write();
        Ok(())
    }

    async fn list_chapter_lessons(
        &self,
        user_id: &UserId,
        chapter: ChapterId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let guard = self.lock()?;
        let mut found: Vec<_> = guard
            .lessons
            .iter()
            .filter(|((user, key), _)| user == user_id && key.chapter == chapter)
            .map(|(_, lesson)| lesson.clone())
            .collect();
        found.sort_by_key(LessonProgress::key);
        Ok(found)
    }
}

#[async_trait]
impl UserProgressRepository for InMemoryRepository {
    async fn get_user_progress(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserProgress>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.users.get(user_id).cloned())
    }

    async fn put_user_progress(
        &self,
        user_id: &UserId,
        progress: &UserProgress,
    ) -> Result<(), StorageError> {
        {
            let mut guard = self.begin_write()?;
            guard.users.insert(user_id.clone(), progress.clone());
            self.finish_write();
        }
        self.subscriptions.publish(user_id, progress);
        Ok(())
    }

    async fn record_session(
        &self,
        user_id: &UserId,
        record: &SessionRecord,
    ) -> Result<UserProgress, StorageError> {
        let updated = {
            let mut guard = self.begin_write()?;
            let progress = guard.users.entry(user_id.clone()).or_default();
            progress.record_session(record);
            let updated = progress.clone();
            self.finish_write();
            updated
        };
        self.subscriptions.publish(user_id, &updated);
        Ok(updated)
    }

    async fn subscribe(
        &self,
        user_id: &UserId,
    ) -> Result<watch::Receiver<Option<UserProgress>>, StorageError> {
        let current = self.get_user_progress(user_id).await?;
        self.subscriptions.subscribe(user_id, current)
    }
}

#[async_trait]
impl CompletionRepository for InMemoryRepository {
    async fn commit_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StorageError> {
        let (user, outcome) = {
            let mut guard = self.begin_write()?;
            if guard.operations.contains(&commit.operation_id) {
                return Ok(CommitOutcome::AlreadyApplied);
            }

            let user_id = commit.user_id.clone();
            let current = guard.lessons.get(&(user_id.clone(), commit.lesson)).cloned();
            let next = commit
                .next
                .and_then(|key| guard.lessons.get(&(user_id.clone(), key)).cloned());
            let existing_user = guard.users.get(&user_id).cloned();

            let Ok(docs) = commit.apply(current, next, existing_user) else {
                return Ok(CommitOutcome::Locked);
            };

            guard
                .lessons
                .insert((user_id.clone(), docs.lesson.key()), docs.lesson);
            if let Some(next) = docs.next {
                guard.lessons.insert((user_id.clone(), next.key()), next);
            }
            guard.users.insert(user_id, docs.user.clone());
            guard.operations.insert(commit.operation_id);
            self.finish_write();

            (
                docs.user,
                CommitOutcome::Applied {
                    first_completion: docs.first_completion,
                    next_created: docs.next_created,
                },
            )
        };

        self.subscriptions.publish(&commit.user_id, &user);
        Ok(outcome)
    }
}

/// Aggregates progress repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub lessons: Arc<dyn LessonProgressRepository>,
    pub users: Arc<dyn UserProgressRepository>,
    pub completions: Arc<dyn CompletionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Share one repository value across all three handles.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: LessonProgressRepository + UserProgressRepository + CompletionRepository + Clone + 'static,
    {
        let lessons: Arc<dyn LessonProgressRepository> = Arc::new(repo.clone());
        let users: Arc<dyn UserProgressRepository> = Arc::new(repo.clone());
        let completions: Arc<dyn CompletionRepository> = Arc::new(repo);
        Self {
            lessons,
            users,
            completions,
        }
    }
}
