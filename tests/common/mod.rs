//! Common test utilities for integration tests
//!
//! Builds a complete engine over an in-memory SQLite database, a temporary
//! state directory and a scripted phase executor.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor::adapters::executor::ScriptedPhaseExecutor;
use conductor::adapters::fs::{FileExecutionStateStore, StateCleanup};
use conductor::adapters::sqlite::{create_migrated_test_pool, SqliteCoordinationStore, SqliteLockStore};
use conductor::domain::errors::DomainResult;
use conductor::domain::models::{LockScope, PhaseName, PhaseRecord, PhaseSpec};
use conductor::domain::ports::{
    Clock, CoordinationStore, IssueProvider, PullRequestRef, PullRequestState, SystemClock, TargetStatus,
};
use conductor::services::{
    PhaseOrchestrator, PhaseOrchestratorConfig, PreflightGate, RetryPolicy, StateValidator,
    VerificationRetrier, WorkflowLockManager, WorkflowService,
};
use tempfile::TempDir;

pub const TARGET: &str = "42";

pub struct Engine {
    pub coordination: Arc<SqliteCoordinationStore>,
    pub state: Arc<FileExecutionStateStore>,
    pub locks: Arc<WorkflowLockManager>,
    pub executor: ScriptedPhaseExecutor,
    pub orchestrator: Arc<PhaseOrchestrator>,
    pub service: Arc<WorkflowService>,
    pub dir: TempDir,
}

pub async fn engine() -> Engine {
    engine_with(PhaseOrchestratorConfig::default()).await
}

pub async fn engine_with(config: PhaseOrchestratorConfig) -> Engine {
    build(config, None).await
}

/// Engine whose orchestrator and preflight gate talk to `provider`.
pub async fn engine_with_provider(provider: Arc<dyn IssueProvider>) -> Engine {
    build(PhaseOrchestratorConfig::default(), Some(provider)).await
}

async fn build(config: PhaseOrchestratorConfig, provider: Option<Arc<dyn IssueProvider>>) -> Engine {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
    let coordination = Arc::new(SqliteCoordinationStore::new(pool.clone()));
    let state = Arc::new(FileExecutionStateStore::new(dir.path().join("state")));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let locks = Arc::new(WorkflowLockManager::new(
        Arc::new(SqliteLockStore::new(pool)),
        clock.clone(),
        Duration::from_secs(120 * 60),
    ));
    let validator = Arc::new(StateValidator::new(coordination.clone(), state.clone(), dir.path()));
    let executor = ScriptedPhaseExecutor::new(dir.path().join("artifacts"));

    let fast_verification = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    };
    let mut orchestrator = PhaseOrchestrator::new(
        coordination.clone(),
        state.clone(),
        locks.clone(),
        validator,
        Arc::new(executor.clone()),
        config,
    )
    .with_retrier(VerificationRetrier::new(fast_verification))
    .with_cleanup(Arc::new(StateCleanup::new(state.clone())));
    let mut preflight = PreflightGate::new(locks.clone(), clock, Duration::from_secs(3600));
    if let Some(provider) = provider {
        orchestrator = orchestrator.with_provider(provider.clone());
        preflight = preflight.with_provider(provider);
    }
    let orchestrator = Arc::new(orchestrator);
    let service = Arc::new(
        WorkflowService::new(coordination.clone(), state.clone(), locks.clone(), preflight, orchestrator.clone())
            .with_lock_scope(LockScope::PerAttempt),
    );

    Engine { coordination, state, locks, executor, orchestrator, service, dir }
}

impl Engine {
    /// Enqueue a linear chain for [`TARGET`], returning records in phase order.
    pub async fn enqueue_chain(&self, phases: &[PhaseName]) -> Vec<PhaseRecord> {
        self.service
            .enqueue(TARGET, &PhaseSpec::chain(phases))
            .await
            .expect("enqueue failed");
        self.records().await
    }

    pub async fn records(&self) -> Vec<PhaseRecord> {
        self.coordination.list_by_parent(TARGET).await.expect("list failed")
    }

    pub async fn record(&self, queue_id: uuid::Uuid) -> PhaseRecord {
        self.coordination.get(queue_id).await.expect("get failed").expect("record missing")
    }
}

/// Issue provider that keeps every posted comment and reports pull
/// requests as merged unless told otherwise.
pub struct RecordingProvider {
    pub comments: tokio::sync::Mutex<Vec<String>>,
    /// State reported for every pull request; `None` means not visible.
    pub pull_request_state: Option<PullRequestState>,
    pub lookups: AtomicU32,
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self::with_pull_request_state(Some(PullRequestState::Merged))
    }
}

impl RecordingProvider {
    pub fn with_pull_request_state(state: Option<PullRequestState>) -> Self {
        Self { comments: tokio::sync::Mutex::new(Vec::new()), pull_request_state: state, lookups: AtomicU32::new(0) }
    }

    pub async fn comment_count(&self) -> usize {
        self.comments.lock().await.len()
    }

    pub fn lookup_count(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IssueProvider for RecordingProvider {
    async fn target_status(&self, _target: &str) -> DomainResult<TargetStatus> {
        Ok(TargetStatus { open: true, merged: false })
    }

    async fn competing_results(&self, _target: &str) -> DomainResult<Vec<PullRequestRef>> {
        Ok(Vec::new())
    }

    async fn pull_request(&self, number: u64) -> DomainResult<Option<PullRequestRef>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.pull_request_state.map(|state| PullRequestRef {
            number,
            url: format!("https://example.invalid/pull/{number}"),
            state,
            head_branch: format!("conductor/{TARGET}"),
        }))
    }

    async fn last_status_marker(&self, _target: &str) -> DomainResult<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn post_status_comment(&self, _target: &str, body: &str) -> DomainResult<()> {
        self.comments.lock().await.push(body.to_string());
        Ok(())
    }
}
