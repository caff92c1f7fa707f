use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs versioned migrations for the progress schema.
///
/// Version 1 creates user aggregates, lesson documents, applied-operation
/// ledger, and indexes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: progress schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS user_progress (
                    user_id TEXT PRIMARY KEY,
                    total_minutes INTEGER NOT NULL CHECK (total_minutes >= 0),
                    sessions_completed INTEGER NOT NULL CHECK (sessions_completed >= 0),
                    lessons_completed INTEGER NOT NULL CHECK (lessons_completed >= 0),
                    last_active_day TEXT,
                    activity_log TEXT NOT NULL,
                    weekly_progress TEXT NOT NULL,
                    archived_progress TEXT NOT NULL,
                    last_week_reset TEXT,
                    updated_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS lesson_progress (
                    user_id TEXT NOT NULL,
                    chapter_id INTEGER NOT NULL CHECK (chapter_id >= 0),
                    lesson_id INTEGER NOT NULL CHECK (lesson_id >= 0),
                    unlocked INTEGER NOT NULL CHECK (unlocked IN (0, 1)),
                    started INTEGER NOT NULL CHECK (started IN (0, 1)),
                    completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
                    minutes_spent INTEGER NOT NULL CHECK (minutes_spent >= 0),
                    messages TEXT NOT NULL,
                    last_attempt TEXT,
                    completed_at TEXT,
                    unlocked_at TEXT,
                    PRIMARY KEY (user_id, chapter_id, lesson_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS applied_operations (
                    operation_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    applied_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_lesson_progress_user_chapter
                    ON lesson_progress (user_id, chapter_id, lesson_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_applied_operations_user
                    ON applied_operations (user_id, applied_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
