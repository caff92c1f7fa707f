//! Shared error types for the services crate.

use thiserror::Error;

use practice_core::model::{LessonError, SettingsError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by the progress services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
