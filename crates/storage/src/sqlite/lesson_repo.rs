use practice_core::model::{ChapterId, ChatMessage, LessonKey, LessonProgress, UserId};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{db_err, map_lesson_row, to_json};
use crate::repository::{LessonProgressRepository, StorageError};

const SELECT_LESSON: &str = r"
    SELECT
        chapter_id, lesson_id, unlocked, started, completed, minutes_spent,
        messages, last_attempt, completed_at, unlocked_at
    FROM lesson_progress
";

pub(super) async fn fetch_lesson(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    key: LessonKey,
) -> Result<Option<LessonProgress>, StorageError> {
    let sql = format!("{SELECT_LESSON} WHERE user_id = ?1 AND chapter_id = ?2 AND lesson_id = ?3");
    let row = sqlx::query(&sql)
        .bind(user_id.as_str())
        .bind(i64::from(key.chapter.value()))
        .bind(i64::from(key.lesson.value()))
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

    row.as_ref().map(map_lesson_row).transpose()
}

pub(super) async fn store_lesson(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    lesson: &LessonProgress,
) -> Result<(), StorageError> {
    let key = lesson.key();
    let messages = to_json("messages", &lesson.messages())?;

    sqlx::query(
        r"
            INSERT INTO lesson_progress (
                user_id, chapter_id, lesson_id, unlocked, started, completed,
                minutes_spent, messages, last_attempt, completed_at, unlocked_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(user_id, chapter_id, lesson_id) DO UPDATE SET
                unlocked = excluded.unlocked,
                started = excluded.started,
                completed = excluded.completed,
                minutes_spent = excluded.minutes_spent,
                messages = excluded.messages,
                last_attempt = excluded.last_attempt,
                completed_at = excluded.completed_at,
                unlocked_at = excluded.unlocked_at
        ",
    )
    .bind(user_id.as_str())
    .bind(i64::from(key.chapter.value()))
    .bind(i64::from(key.lesson.value()))
    .bind(lesson.is_unlocked())
    .bind(lesson.is_started())
    .bind(lesson.is_completed())
    .bind(i64::from(lesson.minutes_spent()))
    .bind(messages)
    .bind(lesson.last_attempt())
    .bind(lesson.completed_at())
    .bind(lesson.unlocked_at())
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(())
}

#[async_trait::async_trait]
impl LessonProgressRepository for SqliteRepository {
    async fn get_lesson(
        &self,
        user_id: &UserId,
        key: LessonKey,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_lesson(&mut conn, user_id, key).await
    }

    async fn upsert_lesson(
        &self,
        user_id: &UserId,
        lesson: &LessonProgress,
    ) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        store_lesson(&mut conn, user_id, lesson).await
    }

    async fn insert_lesson_if_absent(
        &self,
        user_id: &UserId,
        lesson: &LessonProgress,
    ) -> Result<LessonProgress, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if let Some(existing) = fetch_lesson(&mut tx, user_id, lesson.key()).await? {
            return Ok(existing);
        }
        store_lesson(&mut tx, user_id, lesson).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(lesson.clone())
    }

    async fn append_message(
        &self,
        user_id: &UserId,
        key: LessonKey,
        message: &ChatMessage,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut lesson = fetch_lesson(&mut tx, user_id, key)
            .await?
            .ok_or(StorageError::NotFound)?;
        lesson.push_message(message.clone());
        store_lesson(&mut tx, user_id, &lesson).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_chapter_lessons(
        &self,
        user_id: &UserId,
        chapter: ChapterId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let sql = format!("{SELECT_LESSON} WHERE user_id = ?1 AND chapter_id = ?2 ORDER BY lesson_id ASC");
        let rows = sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(i64::from(chapter.value()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_lesson_row(&row)?);
        }
        Ok(out)
    }
}
