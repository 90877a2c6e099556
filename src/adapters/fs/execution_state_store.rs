//! File-backed ExecutionStateStore: one JSON document per attempt.
//!
//! Every write goes to a temporary sibling first and is then renamed over the
//! target, so a crash leaves either the old or the new document, never a torn one.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{reserved_key_in, ExecutionState};
use crate::domain::ports::ExecutionStateStore;

/// One JSON document per attempt under a state directory.
pub struct FileExecutionStateStore {
    dir: PathBuf,
    // Serialises read-modify-write in `update`.
    write_lock: Mutex<()>,
}

impl FileExecutionStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the document for `attempt_id` lives.
    pub fn path_for(&self, attempt_id: Uuid) -> PathBuf {
        self.dir.join(format!("{attempt_id}.json"))
    }

    async fn read(&self, attempt_id: Uuid) -> DomainResult<ExecutionState> {
        let path = self.path_for(attempt_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DomainError::ExecutionStateNotFound(attempt_id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_atomic(&self, state: &ExecutionState) -> DomainResult<()> {
        if let Some(key) = state.reserved_key() {
            tracing::warn!(attempt_id = %state.attempt_id, key, "rejected reserved key in execution state");
            return Err(DomainError::SchemaViolation { key: key.to_string() });
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(state.attempt_id);
        let tmp = self.dir.join(format!(".{}.{}.tmp", state.attempt_id, Uuid::new_v4()));
        let body = serde_json::to_vec_pretty(state)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        let written = async {
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(attempt_id = %state.attempt_id, path = %target.display(), "execution state saved");
        Ok(())
    }
}

#[async_trait]
impl ExecutionStateStore for FileExecutionStateStore {
    async fn load(&self, attempt_id: Uuid) -> DomainResult<ExecutionState> {
        self.read(attempt_id).await
    }

    async fn save(&self, state: &ExecutionState) -> DomainResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_atomic(state).await
    }

    async fn update(&self, attempt_id: Uuid, patch: Map<String, Value>) -> DomainResult<ExecutionState> {
        if let Some(key) = reserved_key_in(&patch) {
            return Err(DomainError::SchemaViolation { key: key.to_string() });
        }

        let _guard = self.write_lock.lock().await;
        let mut state = self.read(attempt_id).await?;
        state.merge(patch);
        state.updated_at = Utc::now();
        self.write_atomic(&state).await?;
        Ok(state)
    }

    async fn delete(&self, attempt_id: Uuid) -> DomainResult<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(attempt_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
