use practice_core::model::{ChapterId, LessonId, LessonKey, LessonProgress, UserProgress};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

// SQLite primary result codes that mean "not allowed to write".
const SQLITE_PERM: i32 = 3;
const SQLITE_READONLY: i32 = 8;
const SQLITE_AUTH: i32 = 23;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps driver errors, separating permission failures from connectivity ones.
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    if let Some(db) = e.as_database_error() {
        let primary = db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff);
        if matches!(primary, Some(SQLITE_PERM | SQLITE_READONLY | SQLITE_AUTH)) {
            return StorageError::PermissionDenied(db.message().to_string());
        }
    }
    StorageError::Connection(e.to_string())
}

pub(crate) fn to_json<T: Serialize>(field: &'static str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value)
        .map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(field: &'static str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn key_from_row(row: &SqliteRow) -> Result<LessonKey, StorageError> {
    let chapter = u32_from_i64("chapter_id", row.try_get::<i64, _>("chapter_id").map_err(ser)?)?;
    let lesson = u32_from_i64("lesson_id", row.try_get::<i64, _>("lesson_id").map_err(ser)?)?;
    Ok(LessonKey::new(ChapterId::new(chapter), LessonId::new(lesson)))
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    let key = key_from_row(row)?;
    let messages = from_json(
        "messages",
        &row.try_get::<String, _>("messages").map_err(ser)?,
    )?;

    LessonProgress::from_persisted(
        key,
        row.try_get("unlocked").map_err(ser)?,
        row.try_get("started").map_err(ser)?,
        row.try_get("completed").map_err(ser)?,
        u32_from_i64(
            "minutes_spent",
            row.try_get::<i64, _>("minutes_spent").map_err(ser)?,
        )?,
        messages,
        row.try_get("last_attempt").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        row.try_get("unlocked_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_user_row(row: &SqliteRow) -> Result<UserProgress, StorageError> {
    Ok(UserProgress {
        total_minutes: u32_from_i64(
            "total_minutes",
            row.try_get::<i64, _>("total_minutes").map_err(ser)?,
        )?,
        sessions_completed: u32_from_i64(
            "sessions_completed",
            row.try_get::<i64, _>("sessions_completed").map_err(ser)?,
        )?,
        lessons_completed: u32_from_i64(
            "lessons_completed",
            row.try_get::<i64, _>("lessons_completed").map_err(ser)?,
        )?,
        last_active_day: row.try_get("last_active_day").map_err(ser)?,
        activity_log: from_json(
            "activity_log",
            &row.try_get::<String, _>("activity_log").map_err(ser)?,
        )?,
        weekly_progress: from_json(
            "weekly_progress",
            &row.try_get::<String, _>("weekly_progress").map_err(ser)?,
        )?,
        archived_progress: from_json(
            "archived_progress",
            &row.try_get::<String, _>("archived_progress").map_err(ser)?,
        )?,
        last_week_reset: row.try_get("last_week_reset").map_err(ser)?,
    })
}
