//! Local write-behind copies of lesson sessions that could not reach the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use practice_core::model::{ChatMessage, LessonKey, OperationId, UserId};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::repository::StorageError;

/// What the session was doing when the cloud write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotKind {
    Partial,
    Completion { operation_id: OperationId },
}

/// Last known state of a lesson session, kept on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSnapshot {
    pub user_id: UserId,
    pub lesson: LessonKey,
    pub kind: SnapshotKind,
    pub duration_secs: u64,
    pub messages: Vec<ChatMessage>,
    pub saved_at: DateTime<Utc>,
}

impl LessonSnapshot {
    /// Storage key, `lesson_progress_{chapter}_{lesson}`.
    #[must_use]
    pub fn key(&self) -> String {
        self.lesson.snapshot_key()
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Save or replace the snapshot of a lesson.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be written.
    async fn save_snapshot(&self, snapshot: &LessonSnapshot) -> Result<(), StorageError>;

    /// Load the pending snapshot of a lesson, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failures. Unreadable snapshots are `Ok(None)`.
    async fn load_snapshot(
        &self,
        user_id: &UserId,
        lesson: LessonKey,
    ) -> Result<Option<LessonSnapshot>, StorageError>;

    /// Drop the snapshot of a lesson once it reached the store.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on I/O failures. Removing a missing snapshot is not an error.
    async fn remove_snapshot(&self, user_id: &UserId, lesson: LessonKey)
    -> Result<(), StorageError>;
}

//
// ─── IN MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<Mutex<HashMap<(UserId, String), LessonSnapshot>>>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|g| g.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: &LessonSnapshot) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(
            (snapshot.user_id.clone(), snapshot.key()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn load_snapshot(
        &self,
        user_id: &UserId,
        lesson: LessonKey,
    ) -> Result<Option<LessonSnapshot>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&(user_id.clone(), lesson.snapshot_key()))
            .cloned())
    }

    async fn remove_snapshot(
        &self,
        user_id: &UserId,
        lesson: LessonKey,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(user_id.clone(), lesson.snapshot_key()));
        Ok(())
    }
}

//
// ─── FILES ─────────────────────────────────────────────────────────────────────
//

/// Snapshots as JSON files: `{root}/{user}/lesson_progress_{chapter}_{lesson}.json`.
///
/// The user directory name escapes every byte outside `[A-Za-z0-9-]` as `_XX`,
/// so distinct user ids never share a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user_id: &UserId) -> PathBuf {
        self.root.join(encode_dir_name(user_id.as_str()))
    }

    fn path_for(&self, user_id: &UserId, lesson: LessonKey) -> PathBuf {
        self.user_dir(user_id)
            .join(format!("{}.json", lesson.snapshot_key()))
    }
}

fn encode_dir_name(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{byte:02X}"));
        }
    }
    encoded
}

fn io_err(e: &std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        StorageError::PermissionDenied(e.to_string())
    } else {
        StorageError::Connection(e.to_string())
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save_snapshot(&self, snapshot: &LessonSnapshot) -> Result<(), StorageError> {
        let dir = self.user_dir(&snapshot.user_id);
        fs::create_dir_all(&dir).await.map_err(|e| io_err(&e))?;
        let payload = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fs::write(self.path_for(&snapshot.user_id, snapshot.lesson), payload)
            .await
            .map_err(|e| io_err(&e))
    }

    async fn load_snapshot(
        &self,
        user_id: &UserId,
        lesson: LessonKey,
    ) -> Result<Option<LessonSnapshot>, StorageError> {
        let path = self.path_for(user_id, lesson);
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<LessonSnapshot>(&bytes) {
                Ok(snapshot) if snapshot.user_id == *user_id && snapshot.lesson == lesson => {
                    Ok(Some(snapshot))
                }
                Ok(snapshot) => {
                    warn!(
                        path = %path.display(),
                        owner = %snapshot.user_id,
                        "ignoring snapshot saved for another user or lesson"
                    );
                    Ok(None)
                }
                Err(err) => {
                    warn!(path = %path.display(), "ignoring unreadable snapshot: {err}");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&err)),
        }
    }

    async fn remove_snapshot(
        &self,
        user_id: &UserId,
        lesson: LessonKey,
    ) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(user_id, lesson)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&err)),
        }
    }
}
