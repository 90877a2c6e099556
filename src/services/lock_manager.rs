//! Per-target workflow lock with TTL expiry.
//!
//! Locks are advisory and scoped to a parent target only; attempts on
//! different targets never contend. Expiry is evaluated against the injected
//! [`Clock`], so a crashed holder is superseded once its TTL runs out.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::LockStatus;
use crate::domain::ports::{Clock, LockStore};

/// Per-target lock bookkeeping over a [`LockStore`].
pub struct WorkflowLockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

fn to_chrono(ttl: Duration) -> DomainResult<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| DomainError::ConfigError(format!("Lock TTL out of range: {e}")))
}

impl WorkflowLockManager {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self { store, clock, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Try to take the lock for `parent_target`.
    ///
    /// Returns `false` when a different attempt holds a live lock. The holder
    /// re-acquiring its own lock succeeds and extends the expiry.
    pub async fn acquire(&self, parent_target: &str, attempt_id: Uuid, ttl: Duration) -> DomainResult<bool> {
        let now = self.clock.now();
        let expires_at = now + to_chrono(ttl)?;
        let acquired = self.store.try_acquire(parent_target, attempt_id, now, expires_at).await?;

        if acquired {
            info!(
                parent_target = %parent_target,
                attempt_id = %attempt_id,
                expires_at = %expires_at,
                "Acquired workflow lock"
            );
        } else {
            let holder = self.store.get(parent_target).await?.map(|lock| lock.attempt_id);
            warn!(
                parent_target = %parent_target,
                attempt_id = %attempt_id,
                holder = ?holder,
                "Workflow lock held by another attempt"
            );
        }
        Ok(acquired)
    }

    /// [`Self::acquire`] with the default TTL, turning contention into an error.
    pub async fn acquire_or_contend(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<()> {
        if self.acquire(parent_target, attempt_id, self.default_ttl).await? {
            return Ok(());
        }
        let status = self.is_locked(parent_target).await?;
        // The holder may have released between the two reads; report it anyway.
        Err(DomainError::LockContention {
            target: parent_target.to_string(),
            holder: status.holder.unwrap_or(Uuid::nil()),
        })
    }

    /// Release the lock only if `attempt_id` holds it.
    pub async fn release(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<bool> {
        let released = self.store.release(parent_target, attempt_id).await?;
        if released {
            info!(parent_target = %parent_target, attempt_id = %attempt_id, "Released workflow lock");
        } else {
            debug!(parent_target = %parent_target, attempt_id = %attempt_id, "No lock held by attempt");
        }
        Ok(released)
    }

    /// Live lock state. An expired row reports as unlocked.
    pub async fn is_locked(&self, parent_target: &str) -> DomainResult<LockStatus> {
        let now = self.clock.now();
        Ok(match self.store.get(parent_target).await? {
            Some(lock) if !lock.is_expired(now) => LockStatus::held(&lock),
            _ => LockStatus::unlocked(),
        })
    }

    /// Push the expiry out by the default TTL. Returns `false` if the attempt
    /// no longer holds the lock.
    pub async fn refresh(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<bool> {
        let expires_at = self.clock.now() + to_chrono(self.default_ttl)?;
        let refreshed = self.store.refresh(parent_target, attempt_id, expires_at).await?;
        if refreshed {
            debug!(parent_target = %parent_target, attempt_id = %attempt_id, expires_at = %expires_at, "Refreshed workflow lock");
        } else {
            warn!(parent_target = %parent_target, attempt_id = %attempt_id, "Lock refresh failed: not held");
        }
        Ok(refreshed)
    }

    /// [`Self::refresh`], turning a lost lock into [`DomainError::LockContention`].
    pub async fn ensure_held(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<()> {
        if self.refresh(parent_target, attempt_id).await? {
            return Ok(());
        }
        let status = self.is_locked(parent_target).await?;
        Err(DomainError::LockContention {
            target: parent_target.to_string(),
            holder: status.holder.unwrap_or(Uuid::nil()),
        })
    }

    /// Drop whatever lock exists for the target. Used by abort.
    pub async fn force_release(&self, parent_target: &str) -> DomainResult<bool> {
        let released = self.store.force_release(parent_target).await?;
        if released {
            warn!(parent_target = %parent_target, "Force-released workflow lock");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteLockStore};
    use crate::domain::ports::ManualClock;

    async fn setup() -> (WorkflowLockManager, Arc<ManualClock>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let manager = WorkflowLockManager::new(
            Arc::new(SqliteLockStore::new(pool)),
            clock.clone(),
            Duration::from_secs(120 * 60),
        );
        (manager, clock)
    }

    #[tokio::test]
    async fn test_contention_then_release() {
        let (manager, clock) = setup().await;
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        assert!(manager.acquire("7", x, Duration::from_secs(7200)).await.unwrap());
        clock.advance(chrono::Duration::seconds(1));
        assert!(!manager.acquire("7", y, Duration::from_secs(7200)).await.unwrap());

        assert!(manager.release("7", x).await.unwrap());
        assert!(manager.acquire("7", y, Duration::from_secs(7200)).await.unwrap());
        assert_eq!(manager.is_locked("7").await.unwrap().holder, Some(y));
    }

    #[tokio::test]
    async fn test_expired_lock_reports_unlocked() {
        let (manager, clock) = setup().await;
        manager.acquire("7", Uuid::new_v4(), Duration::from_secs(1)).await.unwrap();
        assert!(manager.is_locked("7").await.unwrap().locked);

        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(manager.is_locked("7").await.unwrap(), LockStatus::unlocked());
    }

    #[tokio::test]
    async fn test_acquire_or_contend_reports_holder() {
        let (manager, _clock) = setup().await;
        let holder = Uuid::new_v4();
        manager.acquire_or_contend("7", holder).await.unwrap();

        let err = manager.acquire_or_contend("7", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DomainError::LockContention { holder: h, .. } if h == holder));
        assert_eq!(err.exit_code(), 11);
    }

    #[tokio::test]
    async fn test_refresh_extends_expiry() {
        let (manager, clock) = setup().await;
        let holder = Uuid::new_v4();
        manager.acquire("7", holder, Duration::from_secs(60)).await.unwrap();

        clock.advance(chrono::Duration::seconds(30));
        assert!(manager.refresh("7", holder).await.unwrap());
        clock.advance(chrono::Duration::minutes(100));
        assert!(manager.is_locked("7").await.unwrap().locked);

        assert!(!manager.refresh("7", Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_held_reports_the_new_holder() {
        let (manager, clock) = setup().await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        manager.acquire("7", first, Duration::from_secs(60)).await.unwrap();
        manager.ensure_held("7", first).await.unwrap();

        clock.advance(chrono::Duration::hours(3));
        assert!(manager.acquire("7", second, Duration::from_secs(60)).await.unwrap());

        let err = manager.ensure_held("7", first).await.unwrap_err();
        assert!(matches!(err, DomainError::LockContention { holder, .. } if holder == second));
        assert_eq!(manager.is_locked("7").await.unwrap().holder, Some(second));
    }

    #[tokio::test]
    async fn test_targets_are_independent() {
        let (manager, _clock) = setup().await;
        assert!(manager.acquire("7", Uuid::new_v4(), Duration::from_secs(60)).await.unwrap());
        assert!(manager.acquire("8", Uuid::new_v4(), Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_release() {
        let (manager, _clock) = setup().await;
        manager.acquire("7", Uuid::new_v4(), Duration::from_secs(60)).await.unwrap();
        assert!(manager.force_release("7").await.unwrap());
        assert!(!manager.is_locked("7").await.unwrap().locked);
        assert!(!manager.force_release("7").await.unwrap());
    }
}
