//! Per-user update locks. Concurrent updates for one user serialize; different users never contend.

use crate::error::ContextError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits at most `timeout` for the user's lock; `LockTimeout` otherwise.
    pub async fn acquire(
        &self,
        user_id: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, ContextError> {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(
                    target: "askdb::context",
                    user_id = %user_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Context lock wait exceeded"
                );
                Err(ContextError::LockTimeout {
                    user_id: user_id.to_string(),
                })
            }
        }
    }

    /// Drops the lock entry when nobody holds or waits on it.
    pub fn release_idle(&self, user_id: &str) {
        self.locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let locks = UserLocks::new();
        let _held = locks.acquire("u1", Duration::from_millis(50)).await.unwrap();
        let err = locks
            .acquire("u1", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _a = locks.acquire("a", Duration::from_millis(50)).await.unwrap();
        assert!(locks.acquire("b", Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_released() {
        let locks = UserLocks::new();
        {
            let _g = locks.acquire("u1", Duration::from_millis(50)).await.unwrap();
            locks.release_idle("u1");
            assert_eq!(locks.len(), 1);
        }
        locks.release_idle("u1");
        assert!(locks.is_empty());
    }
}
