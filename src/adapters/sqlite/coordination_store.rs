//! SQLite implementation of the CoordinationStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use super::{parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PhaseName, PhaseRecord, PhaseStatus, StatusUpdate, TransitionEvent};
use crate::domain::ports::{Broadcaster, CoordinationStore};

/// SQLite-backed [`CoordinationStore`].
#[derive(Clone)]
pub struct SqliteCoordinationStore {
    pool: SqlitePool,
    broadcaster: Option<Arc<dyn Broadcaster>>,
}

impl SqliteCoordinationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, broadcaster: None }
    }

    /// Emit a transition event after every committed status change.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    async fn insert_with(conn: &mut SqliteConnection, record: &PhaseRecord) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO phase_records (queue_id, parent_target, phase_number, phase_name,
               resolved_target, status, depends_on_phase, attempt_id, priority, queue_position,
               error_message, version, created_at, updated_at, ready_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.queue_id.to_string())
        .bind(&record.parent_target)
        .bind(record.phase_number)
        .bind(record.phase_name.as_str())
        .bind(&record.resolved_target)
        .bind(record.status.as_str())
        .bind(record.depends_on_phase)
        .bind(record.attempt_id.map(|id| id.to_string()))
        .bind(record.priority)
        .bind(record.queue_position)
        .bind(&record.error_message)
        .bind(record.version as i64)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .bind(record.ready_at.map(|t| t.to_rfc3339()))
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for SqliteCoordinationStore {
    async fn insert(&self, record: &PhaseRecord) -> DomainResult<Uuid> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_with(&mut conn, record).await?;
        Ok(record.queue_id)
    }

    async fn insert_all(&self, records: &[PhaseRecord]) -> DomainResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::insert_with(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.iter().map(|r| r.queue_id).collect())
    }

    async fn get(&self, queue_id: Uuid) -> DomainResult<Option<PhaseRecord>> {
        let row: Option<PhaseRecordRow> = sqlx::query_as("SELECT * FROM phase_records WHERE queue_id = ?")
            .bind(queue_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_parent(&self, parent_target: &str) -> DomainResult<Vec<PhaseRecord>> {
        let rows: Vec<PhaseRecordRow> = sqlx::query_as(
            "SELECT * FROM phase_records WHERE parent_target = ? ORDER BY phase_number",
        )
        .bind(parent_target)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status(&self, queue_id: Uuid, update: StatusUpdate) -> DomainResult<PhaseRecord> {
        let mut tx = self.pool.begin().await?;

        let row: Option<PhaseRecordRow> = sqlx::query_as("SELECT * FROM phase_records WHERE queue_id = ?")
            .bind(queue_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let current: PhaseRecord = row.ok_or(DomainError::PhaseNotFound(queue_id))?.try_into()?;

        let from = current.status;
        let to = update.status;
        let attempt_id = update.attempt_id.or(current.attempt_id);

        let illegal = !from.can_transition_to(to)
            || (to == PhaseStatus::Running && attempt_id.is_none());
        if illegal {
            tracing::error!(
                queue_id = %queue_id,
                parent_target = %current.parent_target,
                phase = %current.phase_name,
                from = %from,
                to = %to,
                "invalid phase transition rejected"
            );
            return Err(DomainError::InvalidTransition { queue_id, from, to });
        }

        if to == PhaseStatus::Ready {
            if let Some(dep) = current.depends_on_phase {
                let dep_status: Option<(String,)> = sqlx::query_as(
                    "SELECT status FROM phase_records WHERE parent_target = ? AND phase_number = ?",
                )
                .bind(&current.parent_target)
                .bind(dep)
                .fetch_optional(&mut *tx)
                .await?;

                let satisfied = dep_status
                    .and_then(|(s,)| PhaseStatus::from_str(&s))
                    .is_some_and(|s| s == PhaseStatus::Completed);
                if !satisfied {
                    tracing::error!(
                        queue_id = %queue_id,
                        parent_target = %current.parent_target,
                        depends_on_phase = dep,
                        "phase cannot become ready before its dependency completes"
                    );
                    return Err(DomainError::InvalidTransition { queue_id, from, to });
                }
            }
        }

        let now = Utc::now();
        let mut next = current.clone();
        next.status = to;
        next.attempt_id = attempt_id;
        next.updated_at = now;
        next.version = current.version + 1;
        if update.resolved_target.is_some() {
            next.resolved_target = update.resolved_target.clone();
        }
        match to {
            PhaseStatus::Queued => {
                next.ready_at = None;
                next.started_at = None;
                next.completed_at = None;
                next.error_message = None;
            }
            PhaseStatus::Ready => next.ready_at = Some(now),
            PhaseStatus::Running => {
                next.started_at = Some(now);
                next.error_message = None;
            }
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::Blocked => {
                next.completed_at = Some(now);
                next.error_message = update.error_message.clone();
            }
        }

        let result = sqlx::query(
            r#"UPDATE phase_records SET status = ?, attempt_id = ?, resolved_target = ?,
               error_message = ?, version = ?, updated_at = ?, ready_at = ?, started_at = ?,
               completed_at = ?
               WHERE queue_id = ? AND version = ?"#,
        )
        .bind(next.status.as_str())
        .bind(next.attempt_id.map(|id| id.to_string()))
        .bind(&next.resolved_target)
        .bind(&next.error_message)
        .bind(next.version as i64)
        .bind(next.updated_at.to_rfc3339())
        .bind(next.ready_at.map(|t| t.to_rfc3339()))
        .bind(next.started_at.map(|t| t.to_rfc3339()))
        .bind(next.completed_at.map(|t| t.to_rfc3339()))
        .bind(queue_id.to_string())
        .bind(current.version as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ConcurrencyConflict {
                entity: "phase_record".to_string(),
                id: queue_id.to_string(),
            });
        }

        tx.commit().await?;

        tracing::info!(
            queue_id = %queue_id,
            parent_target = %next.parent_target,
            attempt_id = ?next.attempt_id,
            phase = %next.phase_name,
            from = %from,
            to = %to,
            "phase transition"
        );

        if let Some(ref broadcaster) = self.broadcaster {
            broadcaster.publish(TransitionEvent::new(
                queue_id,
                next.parent_target.clone(),
                next.attempt_id,
                next.phase_name,
                from,
                to,
            ));
        }

        Ok(next)
    }

    async fn find_ready(&self, parent_target: &str) -> DomainResult<Vec<PhaseRecord>> {
        let rows: Vec<PhaseRecordRow> = sqlx::query_as(
            r#"SELECT p.* FROM phase_records p
               LEFT JOIN phase_records d
                 ON d.parent_target = p.parent_target AND d.phase_number = p.depends_on_phase
               WHERE p.parent_target = ?
                 AND p.status IN ('queued', 'ready')
                 AND (p.depends_on_phase IS NULL OR d.status = 'completed')
               ORDER BY p.queue_position ASC, p.priority DESC"#,
        )
        .bind(parent_target)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_by_target(&self, resolved_target: &str) -> DomainResult<Option<PhaseRecord>> {
        let row: Option<PhaseRecordRow> = sqlx::query_as(
            "SELECT * FROM phase_records WHERE resolved_target = ? ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(resolved_target)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct PhaseRecordRow {
    queue_id: String,
    parent_target: String,
    phase_number: i64,
    phase_name: String,
    resolved_target: Option<String>,
    status: String,
    depends_on_phase: Option<i64>,
    attempt_id: Option<String>,
    priority: i64,
    queue_position: i64,
    error_message: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
    ready_at: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<PhaseRecordRow> for PhaseRecord {
    type Error = DomainError;

    fn try_from(row: PhaseRecordRow) -> Result<Self, Self::Error> {
        let status = PhaseStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let phase_name = PhaseName::from_str(&row.phase_name)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase: {}", row.phase_name)))?;

        Ok(PhaseRecord {
            queue_id: parse_uuid(&row.queue_id)?,
            parent_target: row.parent_target,
            phase_number: row.phase_number,
            phase_name,
            resolved_target: row.resolved_target,
            status,
            depends_on_phase: row.depends_on_phase,
            attempt_id: parse_optional_uuid(row.attempt_id)?,
            priority: row.priority,
            queue_position: row.queue_position,
            error_message: row.error_message,
            version: row.version as u64,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            ready_at: parse_optional_datetime(row.ready_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::PhaseSpec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBroadcaster {
        events: Mutex<Vec<TransitionEvent>>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn publish(&self, event: TransitionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    async fn setup_store() -> SqliteCoordinationStore {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteCoordinationStore::new(pool)
    }

    fn two_phase_job(target: &str) -> Vec<PhaseRecord> {
        PhaseSpec::chain(&[PhaseName::Plan, PhaseName::Validate])
            .iter()
            .map(|spec| PhaseRecord::new(target, spec))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = setup_store().await;
        let record = PhaseRecord::new("42", &PhaseSpec::new(PhaseName::Plan));

        let id = store.insert(&record).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();

        assert_eq!(fetched.parent_target, "42");
        assert_eq!(fetched.phase_name, PhaseName::Plan);
        assert_eq!(fetched.status, PhaseStatus::Queued);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_phase_number_rejected() {
        let store = setup_store().await;
        let spec = PhaseSpec::new(PhaseName::Plan);
        store.insert(&PhaseRecord::new("42", &spec)).await.unwrap();

        let err = store.insert(&PhaseRecord::new("42", &spec)).await.unwrap_err();
        assert!(matches!(err, DomainError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn test_find_ready_follows_dependencies() {
        let store = setup_store().await;
        let records = two_phase_job("42");
        store.insert_all(&records).await.unwrap();

        let ready = store.find_ready("42").await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].queue_id, records[0].queue_id);

        let attempt = Uuid::new_v4();
        let id = records[0].queue_id;
        store.update_status(id, StatusUpdate::to(PhaseStatus::Ready)).await.unwrap();
        store.update_status(id, StatusUpdate::to(PhaseStatus::Running).by(attempt)).await.unwrap();
        store.update_status(id, StatusUpdate::to(PhaseStatus::Completed)).await.unwrap();

        let ready = store.find_ready("42").await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].queue_id, records[1].queue_id);
    }

    #[tokio::test]
    async fn test_find_ready_orders_by_position_then_priority() {
        let store = setup_store().await;
        let low = PhaseRecord::new("9", &PhaseSpec::new(PhaseName::Lint).with_priority(1));
        let mut high = PhaseRecord::new("9", &PhaseSpec::new(PhaseName::Test).with_priority(5));
        high.queue_position = low.queue_position;
        let first = PhaseRecord::new("9", &PhaseSpec::new(PhaseName::Plan));
        store.insert_all(&[low.clone(), high.clone(), first.clone()]).await.unwrap();

        let ready: Vec<Uuid> = store.find_ready("9").await.unwrap().iter().map(|r| r.queue_id).collect();
        assert_eq!(ready, vec![first.queue_id, high.queue_id, low.queue_id]);
    }

    #[tokio::test]
    async fn test_illegal_transitions_rejected() {
        let store = setup_store().await;
        let records = two_phase_job("42");
        store.insert_all(&records).await.unwrap();

        let err = store
            .update_status(records[0].queue_id, StatusUpdate::to(PhaseStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidTransition { from: PhaseStatus::Queued, to: PhaseStatus::Completed, .. }
        ));

        // Dependency not yet completed
        let err = store
            .update_status(records[1].queue_id, StatusUpdate::to(PhaseStatus::Ready))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        // Running needs an attempt id
        store.update_status(records[0].queue_id, StatusUpdate::to(PhaseStatus::Ready)).await.unwrap();
        let err = store
            .update_status(records[0].queue_id, StatusUpdate::to(PhaseStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        let unchanged = store.get(records[0].queue_id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, PhaseStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_can_be_requeued() {
        let store = setup_store().await;
        let record = PhaseRecord::new("42", &PhaseSpec::new(PhaseName::Build));
        store.insert(&record).await.unwrap();
        let id = record.queue_id;
        let attempt = Uuid::new_v4();

        store.update_status(id, StatusUpdate::to(PhaseStatus::Ready)).await.unwrap();
        store.update_status(id, StatusUpdate::to(PhaseStatus::Running).by(attempt)).await.unwrap();
        let failed = store
            .update_status(id, StatusUpdate::to(PhaseStatus::Failed).with_error("boom"))
            .await
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert!(failed.completed_at.is_some());

        let requeued = store.update_status(id, StatusUpdate::to(PhaseStatus::Queued)).await.unwrap();
        assert_eq!(requeued.status, PhaseStatus::Queued);
        assert!(requeued.error_message.is_none());
        assert!(requeued.completed_at.is_none());
        assert_eq!(requeued.attempt_id, Some(attempt));
        assert_eq!(requeued.version, 5);
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let pool = create_migrated_test_pool().await.unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let store = SqliteCoordinationStore::new(pool).with_broadcaster(broadcaster.clone());

        let record = PhaseRecord::new("42", &PhaseSpec::new(PhaseName::Plan));
        store.insert(&record).await.unwrap();
        store.update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Ready)).await.unwrap();
        let _ = store
            .update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Completed))
            .await;

        let events = broadcaster.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, PhaseStatus::Queued);
        assert_eq!(events[0].to, PhaseStatus::Ready);
    }

    #[tokio::test]
    async fn test_find_by_resolved_target() {
        let store = setup_store().await;
        let record = PhaseRecord::new("feature-x", &PhaseSpec::new(PhaseName::Plan));
        store.insert(&record).await.unwrap();
        store
            .update_status(
                record.queue_id,
                StatusUpdate::to(PhaseStatus::Ready).resolving(Some("1234".into())),
            )
            .await
            .unwrap();

        let found = store.find_by_target("1234").await.unwrap().unwrap();
        assert_eq!(found.queue_id, record.queue_id);
        assert!(store.find_by_target("9999").await.unwrap().is_none());
    }
}
