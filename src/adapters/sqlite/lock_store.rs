//! SQLite implementation of the LockStore.
//!
//! Timestamps are stored as integer milliseconds so expiry comparisons stay
//! inside a single SQL statement.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::parse_uuid;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkflowLock;
use crate::domain::ports::LockStore;

/// SQLite-backed [`LockStore`]; acquisition is a single UPSERT.
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn ms_to_dt(ms: i64) -> DomainResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| DomainError::SerializationError(format!("Invalid timestamp: {ms}")))
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_acquire(
        &self,
        parent_target: &str,
        attempt_id: Uuid,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        // The WHERE on the conflict branch turns a live foreign lock into a no-op.
        let result = sqlx::query(
            r#"INSERT INTO workflow_locks (parent_target, attempt_id, acquired_at_ms, expires_at_ms)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(parent_target) DO UPDATE SET
                   attempt_id = excluded.attempt_id,
                   acquired_at_ms = CASE
                       WHEN workflow_locks.attempt_id = excluded.attempt_id
                            AND workflow_locks.expires_at_ms > ?
                       THEN workflow_locks.acquired_at_ms
                       ELSE excluded.acquired_at_ms
                   END,
                   expires_at_ms = excluded.expires_at_ms
               WHERE workflow_locks.expires_at_ms <= ?
                  OR workflow_locks.attempt_id = excluded.attempt_id"#,
        )
        .bind(parent_target)
        .bind(attempt_id.to_string())
        .bind(now.timestamp_millis())
        .bind(expires_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM workflow_locks WHERE parent_target = ? AND attempt_id = ?")
            .bind(parent_target)
            .bind(attempt_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn refresh(
        &self,
        parent_target: &str,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE workflow_locks SET expires_at_ms = ? WHERE parent_target = ? AND attempt_id = ?",
        )
        .bind(expires_at.timestamp_millis())
        .bind(parent_target)
        .bind(attempt_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, parent_target: &str) -> DomainResult<Option<WorkflowLock>> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT parent_target, attempt_id, acquired_at_ms, expires_at_ms FROM workflow_locks WHERE parent_target = ?",
        )
        .bind(parent_target)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(parent_target, attempt_id, acquired_at_ms, expires_at_ms)| {
            Ok(WorkflowLock {
                parent_target,
                attempt_id: parse_uuid(&attempt_id)?,
                acquired_at: ms_to_dt(acquired_at_ms)?,
                expires_at: ms_to_dt(expires_at_ms)?,
            })
        })
        .transpose()
    }

    async fn force_release(&self, parent_target: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM workflow_locks WHERE parent_target = ?")
            .bind(parent_target)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
