#![forbid(unsafe_code)]

pub mod app_services;
pub mod dashboard;
pub mod error;
pub mod practice;
pub mod session;
pub mod timer;
pub mod tracker;
pub mod weekly;

pub use practice_core::Clock;

pub use app_services::ProgressServices;
pub use dashboard::{DashboardService, DashboardView};
pub use error::{ProgressError, ServicesError};
pub use practice::PracticeService;
pub use session::{LessonSession, LessonSessionService, SessionOutcome};
pub use timer::TimerDriver;
pub use tracker::LessonProgressTracker;
pub use weekly::{WeeklyAggregator, WeeklyView, format_weekly_data, is_current_week};
