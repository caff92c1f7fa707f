use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use practice_core::model::{
    ChapterId, ChatMessage, LessonKey, LessonPhase, LessonProgress, OperationId, Roadmap,
    TrackerSettingsDraft, UserId, UserProgress, WeeklyEntry,
};
use practice_core::time::{fixed_clock, fixed_now, utc};
use practice_core::timer::TimerThreshold;
use services::{
    Clock, DashboardService, LessonProgressTracker, LessonSessionService, PracticeService,
    SessionOutcome, WeeklyAggregator,
};
use storage::repository::{
    CommitOutcome, CompletionCommit, CompletionRepository, InMemoryRepository,
    LessonProgressRepository, StorageError, UserProgressRepository,
};
use storage::snapshot::{
    FileSnapshotStore, InMemorySnapshotStore, LessonSnapshot, SnapshotKind, SnapshotStore,
};

fn learner() -> UserId {
    UserId::new("learner")
}

fn tracker_over(repo: &InMemoryRepository, clock: Clock) -> Arc<LessonProgressTracker> {
    Arc::new(LessonProgressTracker::new(
        clock,
        Roadmap::new(vec![3, 2]).unwrap(),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    ))
}

struct RejectingCompletions;

#[async_trait]
impl CompletionRepository for RejectingCompletions {
    async fn commit_completion(
        &self,
        _commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StorageError> {
        Err(StorageError::PermissionDenied("missing or insufficient permissions".into()))
    }
}

//
// ─── TRACKER ───────────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn initialize_twice_writes_once() {
    let repo = InMemoryRepository::new();
    let tracker = tracker_over(&repo, fixed_clock());
    let key = LessonKey::from_raw(1, 1);

    let first = tracker.initialize(&learner(), key, true).await.unwrap();
    assert_eq!(repo.write_count(), 1);
    assert_eq!(first.phase(), LessonPhase::Unlocked);

    let second = tracker.initialize(&learner(), key, true).await.unwrap();
    assert_eq!(repo.write_count(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn completion_unlocks_next_lesson_whether_or_not_it_existed() {
    let repo = InMemoryRepository::new();
    let tracker = tracker_over(&repo, fixed_clock());

    // Create branch: lesson 1_2 has never been visited.
    assert!(
        tracker
            .complete_and_unlock_next(&learner(), LessonKey::from_raw(1, 1), 960, Vec::new())
            .await
    );
    let created = repo
        .get_lesson(&learner(), LessonKey::from_raw(1, 2))
        .await
        .unwrap()
        .unwrap();

    // Update branch: lesson 1_3 was visited while still locked.
    let locked = tracker
        .initialize(&learner(), LessonKey::from_raw(1, 3), false)
        .await
        .unwrap();
    assert!(!locked.is_unlocked());
    assert!(
        tracker
            .complete_and_unlock_next(&learner(), LessonKey::from_raw(1, 2), 960, Vec::new())
            .await
    );
    let updated = repo
        .get_lesson(&learner(), LessonKey::from_raw(1, 3))
        .await
        .unwrap()
        .unwrap();

    for doc in [&created, &updated] {
        assert!(doc.is_unlocked());
        assert!(!doc.is_started());
        assert!(!doc.is_completed());
        assert_eq!(doc.unlocked_at(), Some(fixed_now()));
    }
}

#[tokio::test]
async fn completing_a_chapter_opens_the_next_chapter() {
    let repo = InMemoryRepository::new();
    let tracker = tracker_over(&repo, fixed_clock());

    for lesson in 1..=3 {
        assert!(
            tracker
                .complete_and_unlock_next(&learner(), LessonKey::from_raw(1, lesson), 60, Vec::new())
                .await
        );
    }
    let opened = repo
        .get_lesson(&learner(), LessonKey::from_raw(2, 1))
        .await
        .unwrap()
        .expect("next chapter opened");
    assert!(opened.is_unlocked());
}

#[tokio::test]
async fn zero_duration_partial_save_writes_nothing() {
    let repo = InMemoryRepository::new();
    let tracker = tracker_over(&repo, fixed_clock());

    let saved = tracker
        .save_partial_progress(
            &learner(),
            LessonKey::from_raw(1, 1),
            0,
            vec![ChatMessage::user("Hola", fixed_now())],
        )
        .await;
    assert!(saved);
    assert_eq!(repo.write_count(), 0);
}

#[tokio::test]
async fn partial_save_accumulates_minutes_without_completing() {
    let repo = InMemoryRepository::new();
    let tracker = tracker_over(&repo, fixed_clock());
    let key = LessonKey::from_raw(1, 1);

    assert!(tracker.save_partial_progress(&learner(), key, 119, Vec::new()).await);
    let transcript = vec![ChatMessage::user("Buenos días", fixed_now())];
    assert!(
        tracker
            .save_partial_progress(&learner(), key, 240, transcript.clone())
            .await
    );

    let lesson = repo.get_lesson(&learner(), key).await.unwrap().unwrap();
    assert_eq!(lesson.minutes_spent(), 5);
    assert_eq!(lesson.messages(), transcript.as_slice());
    assert!(!lesson.is_completed());
}

#[tokio::test]
async fn retried_completion_is_counted_once() {
    let repo = InMemoryRepository::new();
    let tracker = tracker_over(&repo, fixed_clock());
    let key = LessonKey::from_raw(1, 1);
    let operation_id = OperationId::new();

    let first = tracker
        .complete_with_operation(operation_id, &learner(), key, 1_200, Vec::new())
        .await
        .unwrap();
    assert!(matches!(first, CommitOutcome::Applied { .. }));
    let retry = tracker
        .complete_with_operation(operation_id, &learner(), key, 1_200, Vec::new())
        .await
        .unwrap();
    assert_eq!(retry, CommitOutcome::AlreadyApplied);

    let lesson = repo.get_lesson(&learner(), key).await.unwrap().unwrap();
    assert_eq!(lesson.minutes_spent(), 20);
    let user = repo.get_user_progress(&learner()).await.unwrap().unwrap();
    assert_eq!(user.total_minutes, 20);
    assert_eq!(user.sessions_completed, 1);
}

#[tokio::test]
async fn rejected_completion_reports_false() {
    let repo = InMemoryRepository::new();
    let tracker = LessonProgressTracker::new(
        fixed_clock(),
        Roadmap::unbounded(),
        Arc::new(repo.clone()),
        Arc::new(RejectingCompletions),
    );

    let ok = tracker
        .complete_and_unlock_next(&learner(), LessonKey::from_raw(1, 1), 900, Vec::new())
        .await;
    assert!(!ok);
    assert_eq!(repo.write_count(), 0);
}

#[tokio::test]
async fn chapter_overview_fills_unvisited_lessons_as_locked() {
    let repo = InMemoryRepository::new();
    let tracker = tracker_over(&repo, fixed_clock());
    tracker
        .initialize(&learner(), LessonKey::from_raw(2, 1), true)
        .await
        .unwrap();

    let overview = tracker
        .chapter_overview(&learner(), ChapterId::new(2))
        .await
        .unwrap();
    let phases: Vec<LessonPhase> = overview.iter().map(LessonProgress::phase).collect();
    assert_eq!(phases, vec![LessonPhase::Unlocked, LessonPhase::Locked]);
    assert_eq!(overview[1].key(), LessonKey::from_raw(2, 2));
}

//
// ─── LESSON SESSIONS ───────────────────────────────────────────────────────────
//

#[tokio::test(start_paused = true)]
async fn lesson_session_completes_after_threshold() {
    let repo = InMemoryRepository::new();
    let settings = TrackerSettingsDraft {
        lesson_threshold_secs: Some(3),
        ..TrackerSettingsDraft::new()
    }
    .validate()
    .unwrap();
    let tracker = tracker_over(&repo, fixed_clock());
    let sessions = LessonSessionService::new(
        fixed_clock(),
        tracker,
        Arc::new(InMemorySnapshotStore::new()),
        settings.lesson_threshold(),
    );
    let key = LessonKey::from_raw(1, 1);

    let mut session = sessions.open(&learner(), key).await.unwrap();
    assert!(
        sessions
            .post_message(&mut session, ChatMessage::system("Ordering coffee", fixed_now()))
            .await
    );
    assert!(!session.timer_running());
    assert!(
        sessions
            .post_message(&mut session, ChatMessage::user("Un café, por favor", fixed_now()))
            .await
    );
    assert!(session.timer_running());

    assert_eq!(session.threshold_reached().await, Some(3));
    assert_eq!(sessions.complete(session).await, SessionOutcome::Saved);

    let lesson = repo.get_lesson(&learner(), key).await.unwrap().unwrap();
    assert!(lesson.is_completed());
    assert_eq!(lesson.messages().len(), 2);
    assert!(
        repo.get_lesson(&learner(), LessonKey::from_raw(1, 2))
            .await
            .unwrap()
            .unwrap()
            .is_unlocked()
    );
}

#[tokio::test]
async fn opening_a_locked_lesson_fails() {
    let repo = InMemoryRepository::new();
    let sessions = LessonSessionService::new(
        fixed_clock(),
        tracker_over(&repo, fixed_clock()),
        Arc::new(InMemorySnapshotStore::new()),
        TimerThreshold::LESSON_CHAT,
    );

    assert!(sessions.open(&learner(), LessonKey::from_raw(1, 2)).await.is_err());
}

#[tokio::test]
async fn skipping_ahead_cannot_complete_a_locked_lesson() {
    let repo = InMemoryRepository::new();
    let tracker = LessonProgressTracker::new(
        fixed_clock(),
        Roadmap::new(vec![5]).unwrap(),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    );
    let skipped = LessonKey::from_raw(1, 4);

    let locked = tracker.initialize(&learner(), skipped, false).await.unwrap();
    assert!(!locked.is_unlocked());
    assert!(
        !tracker
            .complete_and_unlock_next(&learner(), skipped, 900, Vec::new())
            .await
    );

    assert!(repo.get_lesson(&learner(), LessonKey::from_raw(1, 3)).await.unwrap().is_none());
    assert!(repo.get_lesson(&learner(), LessonKey::from_raw(1, 5)).await.unwrap().is_none());
    assert!(!repo.get_lesson(&learner(), skipped).await.unwrap().unwrap().is_unlocked());
}

#[tokio::test]
async fn open_ended_roadmap_opens_every_chapter() {
    let repo = InMemoryRepository::new();
    let tracker = Arc::new(LessonProgressTracker::new(
        fixed_clock(),
        Roadmap::unbounded(),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    ));
    let sessions = LessonSessionService::new(
        fixed_clock(),
        Arc::clone(&tracker),
        Arc::new(InMemorySnapshotStore::new()),
        TimerThreshold::LESSON_CHAT,
    );

    for lesson in 1..=10 {
        assert!(
            tracker
                .complete_and_unlock_next(&learner(), LessonKey::from_raw(1, lesson), 60, Vec::new())
                .await
        );
    }

    let session = sessions.open(&learner(), LessonKey::from_raw(2, 1)).await.unwrap();
    assert_eq!(session.key(), LessonKey::from_raw(2, 1));
    assert!(sessions.open(&learner(), LessonKey::from_raw(2, 2)).await.is_err());
}

#[tokio::test]
async fn read_only_store_keeps_completion_locally_until_recovered() {
    let repo = InMemoryRepository::new();
    let snapshots = InMemorySnapshotStore::new();
    let sessions = LessonSessionService::new(
        fixed_clock(),
        tracker_over(&repo, fixed_clock()),
        Arc::new(snapshots.clone()),
        TimerThreshold::LESSON_CHAT,
    );
    let key = LessonKey::from_raw(1, 1);

    let mut session = sessions.open(&learner(), key).await.unwrap();
    repo.set_read_only(true);
    assert!(
        !sessions
            .post_message(&mut session, ChatMessage::user("Hola", fixed_now()))
            .await
    );
    assert_eq!(session.messages().len(), 1);
    let operation_id = session.operation_id();

    assert_eq!(sessions.complete(session).await, SessionOutcome::SavedLocally);
    let pending = snapshots
        .load_snapshot(&learner(), key)
        .await
        .unwrap()
        .expect("snapshot kept");
    assert_eq!(pending.kind, SnapshotKind::Completion { operation_id });
    assert!(!repo.get_lesson(&learner(), key).await.unwrap().unwrap().is_completed());

    // Still rejected: the snapshot stays.
    assert!(sessions.recover(&learner(), key).await.is_err());
    assert_eq!(snapshots.len(), 1);

    repo.set_read_only(false);
    let replayed = sessions
        .recover(&learner(), key)
        .await
        .unwrap()
        .expect("replayed");
    assert_eq!(replayed.messages.len(), 1);
    assert!(snapshots.is_empty());

    let lesson = repo.get_lesson(&learner(), key).await.unwrap().unwrap();
    assert!(lesson.is_completed());
    assert!(sessions.recover(&learner(), key).await.unwrap().is_none());
}

#[tokio::test]
async fn completing_after_a_kept_completion_counts_it_once() {
    let repo = InMemoryRepository::new();
    let snapshots = InMemorySnapshotStore::new();
    let sessions = LessonSessionService::new(
        fixed_clock(),
        tracker_over(&repo, fixed_clock()),
        Arc::new(snapshots.clone()),
        TimerThreshold::LESSON_CHAT,
    );
    let key = LessonKey::from_raw(1, 1);
    snapshots
        .save_snapshot(&LessonSnapshot {
            user_id: learner(),
            lesson: key,
            kind: SnapshotKind::Completion {
                operation_id: OperationId::new(),
            },
            duration_secs: 900,
            messages: vec![ChatMessage::user("Hola", fixed_now())],
            saved_at: fixed_now(),
        })
        .await
        .unwrap();

    let outcome = sessions.complete_lesson(&learner(), key, 900).await.unwrap();
    assert_eq!(outcome, SessionOutcome::Replayed);
    assert!(snapshots.is_empty());

    let user = repo.get_user_progress(&learner()).await.unwrap().unwrap();
    assert_eq!(user.sessions_completed, 1);
    assert_eq!(user.total_minutes, 15);
    assert_eq!(user.activity_log.get(&fixed_now().date_naive()), Some(&1));
    let lesson = repo.get_lesson(&learner(), key).await.unwrap().unwrap();
    assert_eq!(lesson.minutes_spent(), 15);
    assert_eq!(lesson.messages().len(), 1);
}

#[tokio::test]
async fn completing_after_a_kept_partial_adds_both() {
    let repo = InMemoryRepository::new();
    let snapshots = InMemorySnapshotStore::new();
    let sessions = LessonSessionService::new(
        fixed_clock(),
        tracker_over(&repo, fixed_clock()),
        Arc::new(snapshots.clone()),
        TimerThreshold::LESSON_CHAT,
    );
    let key = LessonKey::from_raw(1, 1);
    snapshots
        .save_snapshot(&LessonSnapshot {
            user_id: learner(),
            lesson: key,
            kind: SnapshotKind::Partial,
            duration_secs: 300,
            messages: vec![ChatMessage::user("Hola", fixed_now())],
            saved_at: fixed_now(),
        })
        .await
        .unwrap();

    let outcome = sessions.complete_lesson(&learner(), key, 600).await.unwrap();
    assert_eq!(outcome, SessionOutcome::Saved);

    let lesson = repo.get_lesson(&learner(), key).await.unwrap().unwrap();
    assert!(lesson.is_completed());
    assert_eq!(lesson.minutes_spent(), 15);
    assert_eq!(lesson.messages().len(), 1);
    let user = repo.get_user_progress(&learner()).await.unwrap().unwrap();
    assert_eq!(user.sessions_completed, 1);
    assert_eq!(user.total_minutes, 10);
}

#[tokio::test(start_paused = true)]
async fn early_exit_on_read_only_store_writes_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let repo = InMemoryRepository::new();
    let sessions = LessonSessionService::new(
        fixed_clock(),
        tracker_over(&repo, fixed_clock()),
        Arc::new(FileSnapshotStore::new(dir.path())),
        TimerThreshold::LESSON_CHAT,
    );
    let key = LessonKey::from_raw(1, 1);

    let mut session = sessions.open(&learner(), key).await.unwrap();
    sessions
        .post_message(&mut session, ChatMessage::user("Hola", fixed_now()))
        .await;
    tokio::time::sleep(std::time::Duration::from_secs(90)).await;
    assert!(session.elapsed_secs() >= 89);

    repo.set_read_only(true);
    assert_eq!(sessions.exit(session).await, SessionOutcome::SavedLocally);
    assert!(
        dir.path()
            .join("learner")
            .join("lesson_progress_1_1.json")
            .exists()
    );
}

//
// ─── AGGREGATES ────────────────────────────────────────────────────────────────
//

#[tokio::test]
async fn monday_dashboard_archives_last_week() {
    let this_monday = utc(2024, 1, 15, 9, 0, 0);
    let last_monday = utc(2024, 1, 8, 0, 0, 0);
    let repo = InMemoryRepository::new();
    repo.put_user_progress(
        &learner(),
        &UserProgress {
            total_minutes: 45,
            weekly_progress: vec![
                WeeklyEntry::new(15, last_monday + Duration::hours(10)),
                WeeklyEntry::new(30, last_monday + Duration::days(3)),
            ],
            last_week_reset: Some(last_monday - Duration::seconds(1)),
            ..UserProgress::default()
        },
    )
    .await
    .unwrap();

    let clock = Clock::fixed(this_monday);
    let users: Arc<dyn UserProgressRepository> = Arc::new(repo.clone());
    let weekly = Arc::new(WeeklyAggregator::new(clock, Arc::clone(&users)));
    let dashboard = DashboardService::new(clock, users, weekly);

    let view = dashboard.load(&learner()).await.unwrap();
    assert_eq!(view.archived_weeks, 1);
    assert_eq!(view.week.total_minutes, 0);
    assert_eq!(view.total_minutes, 45);

    let stored = repo.get_user_progress(&learner()).await.unwrap().unwrap();
    assert!(stored.weekly_progress.is_empty());
    assert_eq!(
        stored.archived_progress[0].week_ending,
        utc(2024, 1, 14, 0, 0, 0).date_naive()
    );

    // Reloading in the same week archives nothing new.
    let again = dashboard.load(&learner()).await.unwrap();
    assert_eq!(again.archived_weeks, 1);
}

#[tokio::test]
async fn first_dashboard_load_keeps_this_weeks_lesson() {
    let repo = InMemoryRepository::new();
    let clock = fixed_clock();
    let tracker = tracker_over(&repo, clock);
    let users: Arc<dyn UserProgressRepository> = Arc::new(repo.clone());
    let weekly = Arc::new(WeeklyAggregator::new(clock, Arc::clone(&users)));
    let dashboard = DashboardService::new(clock, users, weekly);

    assert!(
        tracker
            .complete_and_unlock_next(&learner(), LessonKey::from_raw(1, 1), 1_200, Vec::new())
            .await
    );

    let view = dashboard.load(&learner()).await.unwrap();
    assert_eq!(view.week.total_minutes, 20);
    assert_eq!(view.archived_weeks, 0);

    let stored = repo.get_user_progress(&learner()).await.unwrap().unwrap();
    assert_eq!(stored.weekly_progress.len(), 1);
    assert_eq!(stored.last_week_reset, Some(fixed_now()));
}

#[tokio::test]
async fn dashboard_subscription_sees_practice_sessions() {
    let repo = InMemoryRepository::new();
    let clock = fixed_clock();
    let users: Arc<dyn UserProgressRepository> = Arc::new(repo.clone());
    let weekly = Arc::new(WeeklyAggregator::new(clock, Arc::clone(&users)));
    let dashboard = DashboardService::new(clock, Arc::clone(&users), weekly);
    let practice = PracticeService::new(clock, users, TimerThreshold::VOICE_PRACTICE);

    let mut rx = dashboard.watch(&learner()).await.unwrap();
    assert!(rx.borrow_and_update().is_none());

    practice.complete_practice(&learner(), 600).await.unwrap();
    rx.changed().await.unwrap();
    let progress = rx.borrow().clone().expect("published");
    let view = services::DashboardView::from_progress(&progress, fixed_now());
    assert_eq!(view.week.total_minutes, 10);
    assert_eq!(view.contributions.current_streak, 1);
}
