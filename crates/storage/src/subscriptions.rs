use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use practice_core::model::{UserId, UserProgress};
use tokio::sync::watch;

use crate::repository::StorageError;

/// Fan-out of user aggregate updates to live subscribers.
///
/// One `watch` channel per user; senders without receivers are dropped on the
/// next publish.
#[derive(Clone, Default)]
pub struct Subscriptions {
    senders: Arc<Mutex<HashMap<UserId, watch::Sender<Option<UserProgress>>>>>,
}

impl Subscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a receiver, seeding a new channel with `current`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the registry lock is poisoned.
    pub fn subscribe(
        &self,
        user_id: &UserId,
        current: Option<UserProgress>,
    ) -> Result<watch::Receiver<Option<UserProgress>>, StorageError> {
        let mut guard = self
            .senders
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if let Some(tx) = guard.get(user_id) {
            if !tx.is_closed() {
                return Ok(tx.subscribe());
            }
        }
        let (tx, rx) = watch::channel(current);
        guard.insert(user_id.clone(), tx);
        Ok(rx)
    }

    /// Pushes the latest aggregates to every receiver of `user_id`.
    pub fn publish(&self, user_id: &UserId, progress: &UserProgress) {
        let Ok(mut guard) = self.senders.lock() else {
            return;
        };
        let closed = match guard.get(user_id) {
            Some(tx) => tx.send(Some(progress.clone())).is_err(),
            None => false,
        };
        if closed {
            guard.remove(user_id);
        }
    }

    /// Number of users with at least one live receiver.
    #[must_use]
    pub fn active_users(&self) -> usize {
        self.senders
            .lock()
            .map(|guard| guard.values().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_receivers() {
        let subs = Subscriptions::new();
        let user = UserId::new("u1");
        let mut a = subs.subscribe(&user, None).unwrap();
        let mut b = subs.subscribe(&user, None).unwrap();

        let progress = UserProgress {
            total_minutes: 42,
            ..UserProgress::default()
        };
        subs.publish(&user, &progress);

        a.changed().await.unwrap();
        b.changed().await.unwrap();
        assert_eq!(a.borrow().as_ref().map(|p| p.total_minutes), Some(42));
        assert_eq!(b.borrow().as_ref().map(|p| p.total_minutes), Some(42));
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let subs = Subscriptions::new();
        let user = UserId::new("u1");
        let rx = subs.subscribe(&user, None).unwrap();
        assert_eq!(subs.active_users(), 1);
        drop(rx);

        subs.publish(&user, &UserProgress::default());
        assert_eq!(subs.active_users(), 0);
    }
}
