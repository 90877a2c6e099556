use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// Reclaims per-attempt resources once an attempt is finished.
#[async_trait]
pub trait CleanupCollaborator: Send + Sync {
    async fn reclaim(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<()>;
}
