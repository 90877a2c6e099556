use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advisory per-target lock held by one attempt until it expires or is released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowLock {
    pub parent_target: String,
    pub attempt_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WorkflowLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - now).max(chrono::Duration::zero())
    }
}

/// Result of `is_locked`: whether a live lock exists and who holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub locked: bool,
    pub holder: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockStatus {
    pub fn unlocked() -> Self {
        Self { locked: false, holder: None, expires_at: None }
    }

    pub fn held(lock: &WorkflowLock) -> Self {
        Self {
            locked: true,
            holder: Some(lock.attempt_id),
            expires_at: Some(lock.expires_at),
        }
    }
}
