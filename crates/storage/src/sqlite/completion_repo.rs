use chrono::Utc;

use super::SqliteRepository;
use super::lesson_repo::{fetch_lesson, store_lesson};
use super::mapping::db_err;
use super::user_repo::{fetch_user, store_user};
use crate::repository::{CommitOutcome, CompletionCommit, CompletionRepository, StorageError};

#[async_trait::async_trait]
impl CompletionRepository for SqliteRepository {
    async fn commit_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StorageError> {
        let operation_id = commit.operation_id.to_string();
        let user_id = &commit.user_id;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let seen = sqlx::query("SELECT 1 FROM applied_operations WHERE operation_id = ?1")
            .bind(&operation_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if seen.is_some() {
            return Ok(CommitOutcome::AlreadyApplied);
        }

        let current = fetch_lesson(&mut tx, user_id, commit.lesson).await?;
        let next = match commit.next {
            Some(key) => fetch_lesson(&mut tx, user_id, key).await?,
            None => None,
        };
        let existing_user = fetch_user(&mut tx, user_id).await?;

        let Ok(docs) = commit.apply(current, next, existing_user) else {
            tx.rollback().await.map_err(db_err)?;
            return Ok(CommitOutcome::Locked);
        };

        store_lesson(&mut tx, user_id, &docs.lesson).await?;
        if let Some(next) = &docs.next {
            store_lesson(&mut tx, user_id, next).await?;
        }
        store_user(&mut tx, user_id, &docs.user).await?;

        sqlx::query(
            r"
                INSERT INTO applied_operations (operation_id, user_id, applied_at)
                VALUES (?1, ?2, ?3)
            ",
        )
        .bind(&operation_id)
        .bind(user_id.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        self.subscriptions.publish(user_id, &docs.user);
        Ok(CommitOutcome::Applied {
            first_completion: docs.first_completion,
            next_created: docs.next_created,
        })
    }
}
