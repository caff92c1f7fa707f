use chrono::Utc;
use practice_core::model::{SessionRecord, UserId, UserProgress};
use sqlx::SqliteConnection;
use tokio::sync::watch;

use super::SqliteRepository;
use super::mapping::{db_err, map_user_row, to_json};
use crate::repository::{StorageError, UserProgressRepository};

pub(super) async fn fetch_user(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<Option<UserProgress>, StorageError> {
    let row = sqlx::query(
        r"
            SELECT
                total_minutes, sessions_completed, lessons_completed, last_active_day,
                activity_log, weekly_progress, archived_progress, last_week_reset
            FROM user_progress
            WHERE user_id = ?1
        ",
    )
    .bind(user_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    row.as_ref().map(map_user_row).transpose()
}

pub(super) async fn store_user(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    progress: &UserProgress,
) -> Result<(), StorageError> {
    let activity_log = to_json("activity_log", &progress.activity_log)?;
    let weekly = to_json("weekly_progress", &progress.weekly_progress)?;
    let archived = to_json("archived_progress", &progress.archived_progress)?;

    sqlx::query(
        r"
            INSERT INTO user_progress (
                user_id, total_minutes, sessions_completed, lessons_completed,
                last_active_day, activity_log, weekly_progress, archived_progress,
                last_week_reset, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(user_id) DO UPDATE SET
                total_minutes = excluded.total_minutes,
                sessions_completed = excluded.sessions_completed,
                lessons_completed = excluded.lessons_completed,
                last_active_day = excluded.last_active_day,
                activity_log = excluded.activity_log,
                weekly_progress = excluded.weekly_progress,
                archived_progress = excluded.archived_progress,
                last_week_reset = excluded.last_week_reset,
                updated_at = excluded.updated_at
        ",
    )
    .bind(user_id.as_str())
    .bind(i64::from(progress.total_minutes))
    .bind(i64::from(progress.sessions_completed))
    .bind(i64::from(progress.lessons_completed))
    .bind(progress.last_active_day)
    .bind(activity_log)
    .bind(weekly)
    .bind(archived)
    .bind(progress.last_week_reset)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(())
}

#[async_trait::async_trait]
impl UserProgressRepository for SqliteRepository {
    async fn get_user_progress(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserProgress>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_user(&mut conn, user_id).await
    }

    async fn put_user_progress(
        &self,
        user_id: &UserId,
        progress: &UserProgress,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        store_user(&mut conn, user_id, progress).await?;
        self.subscriptions.publish(user_id, progress);
        Ok(())
    }

    async fn record_session(
        &self,
        user_id: &UserId,
        record: &SessionRecord,
    ) -> Result<UserProgress, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut progress = fetch_user(&mut tx, user_id).await?.unwrap_or_default();
        progress.record_session(record);
        store_user(&mut tx, user_id, &progress).await?;
        tx.commit().await.map_err(db_err)?;

        self.subscriptions.publish(user_id, &progress);
        Ok(progress)
    }

    async fn subscribe(
        &self,
        user_id: &UserId,
    ) -> Result<watch::Receiver<Option<UserProgress>>, StorageError> {
        let current = self.get_user_progress(user_id).await?;
        self.subscriptions.subscribe(user_id, current)
    }
}
