mod ids;
mod lesson;
mod message;
mod progress;
mod roadmap;
mod settings;

pub use ids::{ChapterId, LessonId, LessonKey, OperationId, ParseIdError, UserId};

pub use lesson::{LessonError, LessonPhase, LessonProgress, whole_minutes};
pub use message::{ChatMessage, Correction, Feedback};
pub use progress::{ArchivedWeek, SessionRecord, UserProgress, WeekRollover, WeeklyEntry};
pub use roadmap::{Roadmap, RoadmapError};
pub use settings::{SettingsError, TrackerSettings, TrackerSettingsDraft};
