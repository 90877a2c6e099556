use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{PhaseRecord, StatusUpdate};

/// Authoritative store of phase records.
///
/// `update_status` is the only write path for an existing record. It must
/// validate the transition and apply it atomically with respect to other
/// writers of the same record.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Insert a single phase record, returning its queue id.
    async fn insert(&self, record: &PhaseRecord) -> DomainResult<Uuid>;

    /// Insert all records of one job in a single transaction.
    async fn insert_all(&self, records: &[PhaseRecord]) -> DomainResult<Vec<Uuid>>;

    async fn get(&self, queue_id: Uuid) -> DomainResult<Option<PhaseRecord>>;

    /// All records of a job, ordered by phase number.
    async fn list_by_parent(&self, parent_target: &str) -> DomainResult<Vec<PhaseRecord>>;

    /// Apply a legal status transition, returning the updated record.
    async fn update_status(&self, queue_id: Uuid, update: StatusUpdate) -> DomainResult<PhaseRecord>;

    /// Queued or Ready records whose dependency is absent or Completed,
    /// ordered by queue position then priority descending.
    async fn find_ready(&self, parent_target: &str) -> DomainResult<Vec<PhaseRecord>>;

    /// Most recently updated record whose resolved target matches.
    async fn find_by_target(&self, resolved_target: &str) -> DomainResult<Option<PhaseRecord>>;
}
