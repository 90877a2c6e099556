//! Reclaims the execution-state document of a finished attempt.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::ports::{CleanupCollaborator, ExecutionStateStore};

/// Default cleanup collaborator: deletes the attempt's execution state.
pub struct StateCleanup {
    state: Arc<dyn ExecutionStateStore>,
}

impl StateCleanup {
    pub fn new(state: Arc<dyn ExecutionStateStore>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl CleanupCollaborator for StateCleanup {
    async fn reclaim(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<()> {
        if self.state.delete(attempt_id).await? {
            info!(parent_target = %parent_target, attempt_id = %attempt_id, "Reclaimed execution state");
        } else {
            debug!(parent_target = %parent_target, attempt_id = %attempt_id, "No execution state to reclaim");
        }
        Ok(())
    }
}
