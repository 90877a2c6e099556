use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::ExecutionState;

/// Per-attempt key/value persistence with atomic replace.
#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    /// Fails with `ExecutionStateNotFound` when the attempt has no document.
    async fn load(&self, attempt_id: Uuid) -> DomainResult<ExecutionState>;

    /// Replace the whole document. Rejects reserved keys with `SchemaViolation`.
    async fn save(&self, state: &ExecutionState) -> DomainResult<()>;

    /// Shallow-merge `patch` into the stored document and persist it.
    async fn update(&self, attempt_id: Uuid, patch: Map<String, Value>) -> DomainResult<ExecutionState>;

    /// Remove the document. Returns whether one existed.
    async fn delete(&self, attempt_id: Uuid) -> DomainResult<bool>;
}
