use std::path::PathBuf;
use std::sync::Arc;

use practice_core::model::TrackerSettings;
use storage::repository::Storage;
use storage::snapshot::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};

use crate::Clock;
use crate::dashboard::DashboardService;
use crate::error::ServicesError;
use crate::practice::PracticeService;
use crate::session::LessonSessionService;
use crate::tracker::LessonProgressTracker;
use crate::weekly::WeeklyAggregator;

/// Assembles the progress services over one storage backend.
#[derive(Clone)]
pub struct ProgressServices {
    tracker: Arc<LessonProgressTracker>,
    sessions: Arc<LessonSessionService>,
    weekly: Arc<WeeklyAggregator>,
    practice: Arc<PracticeService>,
    dashboard: Arc<DashboardService>,
}

impl ProgressServices {
    /// Build services backed by `SQLite` storage and snapshot files.
    ///
    /// # Errors
    ///
    /// Returns `ServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        snapshot_dir: impl Into<PathBuf>,
        clock: Clock,
        settings: TrackerSettings,
    ) -> Result<Self, ServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(snapshot_dir));
        Ok(Self::from_storage(&storage, snapshots, clock, settings))
    }

    /// Build services over in-memory storage.
    #[must_use]
    pub fn in_memory(clock: Clock, settings: TrackerSettings) -> Self {
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        Self::from_storage(&Storage::in_memory(), snapshots, clock, settings)
    }

    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Clock,
        settings: TrackerSettings,
    ) -> Self {
        let tracker = Arc::new(LessonProgressTracker::new(
            clock,
            settings.roadmap().clone(),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.completions),
        ));
        let sessions = Arc::new(LessonSessionService::new(
            clock,
            Arc::clone(&tracker),
            snapshots,
            settings.lesson_threshold(),
        ));
        let weekly = Arc::new(WeeklyAggregator::new(clock, Arc::clone(&storage.users)));
        let practice = Arc::new(PracticeService::new(
            clock,
            Arc::clone(&storage.users),
            settings.voice_threshold(),
        ));
        let dashboard = Arc::new(DashboardService::new(
            clock,
            Arc::clone(&storage.users),
            Arc::clone(&weekly),
        ));

        Self {
            tracker,
            sessions,
            weekly,
            practice,
            dashboard,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<LessonProgressTracker> {
        Arc::clone(&self.tracker)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<LessonSessionService> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn weekly(&self) -> Arc<WeeklyAggregator> {
        Arc::clone(&self.weekly)
    }

    #[must_use]
    pub fn practice(&self) -> Arc<PracticeService> {
        Arc::clone(&self.practice)
    }

    #[must_use]
    pub fn dashboard(&self) -> Arc<DashboardService> {
        Arc::clone(&self.dashboard)
    }
}
