//! Keyed lock table: one async mutex per user id, created on demand.

use std::sync::Arc;

use contextqa_shared::UserId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes store operations per user; different users never contend.
#[derive(Debug, Default)]
pub(crate) struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user`'s records.
    pub(crate) async fn acquire(&self, user: UserId) -> UserLockGuard<'_> {
        // Clone the Arc out so the shard guard is released before awaiting.
        let lock = self.locks.entry(user).or_default().clone();
        UserLockGuard {
            guard: Some(lock.lock_owned().await),
            user,
            locks: &self.locks,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Holds a user's lock; the table entry is dropped with the last holder.
pub(crate) struct UserLockGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    user: UserId,
    locks: &'a DashMap<UserId, Arc<Mutex<()>>>,
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of one means nobody is queued.
        self.locks.remove_if(&self.user, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = UserLocks::new();
        let guard = locks.acquire(UserId(1)).await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(UserId(1))).await;
        assert!(second.is_err(), "second acquire must wait for the first guard");

        drop(guard);
        let _again = tokio::time::timeout(Duration::from_millis(500), locks.acquire(UserId(1)))
            .await
            .expect("lock released");
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _a = locks.acquire(UserId(1)).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(UserId(2)))
            .await
            .expect("other user must not block");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = UserLocks::new();
        for id in 0..100 {
            let _guard = locks.acquire(UserId(id)).await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.acquire(UserId(9)).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(UserId(9)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1, "queued waiter keeps the entry alive");

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
