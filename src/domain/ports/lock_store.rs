use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::WorkflowLock;

/// Row-level storage behind the workflow lock manager.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Single conditional upsert: succeeds when no lock exists, the existing
    /// lock expired at or before `now`, or it is already held by `attempt_id`.
    async fn try_acquire(
        &self,
        parent_target: &str,
        attempt_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Delete the lock only if held by `attempt_id`.
    async fn release(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<bool>;

    /// Push out the expiry of a lock held by `attempt_id`.
    async fn refresh(
        &self,
        parent_target: &str,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Current row, expired or not.
    async fn get(&self, parent_target: &str) -> DomainResult<Option<WorkflowLock>>;

    /// Unconditionally drop the lock row. Used by explicit abort.
    async fn force_release(&self, parent_target: &str) -> DomainResult<bool>;
}
