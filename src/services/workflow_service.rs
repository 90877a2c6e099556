//! Workflow service: the engine's API surface.
//!
//! Enqueues phase plans, hands single phases or whole attempts to the
//! [`PhaseOrchestrator`], and implements retry, abort and lock inspection on
//! top of the stores. Each run starts a fresh attempt id; once it holds the
//! target lock it adopts the execution state left by the previous attempt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::lock_manager::WorkflowLockManager;
use super::phase_orchestrator::{CancelHandle, CancelToken, PhaseOrchestrator, PhaseOutcome};
use super::preflight::PreflightGate;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LockScope, LockStatus, PhaseRecord, PhaseSpec, PhaseStatus, StatusUpdate};
use crate::domain::ports::{CoordinationStore, ExecutionStateStore};

/// Outcome of walking every ready phase of a target under one attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt_id: Option<Uuid>,
    pub outcomes: Vec<PhaseOutcome>,
    /// Every phase of the target is Completed.
    pub finished: bool,
}

/// What an abort did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AbortReport {
    pub parent_target: String,
    /// An attempt running in this process was signalled.
    pub signalled: bool,
    /// Phases marked Failed directly.
    pub failed: Vec<String>,
    /// Phases blocked as a consequence.
    pub blocked: Vec<String>,
    pub lock_released: bool,
}

/// Public entry point of the coordination engine.
pub struct WorkflowService {
    coordination: Arc<dyn CoordinationStore>,
    state: Arc<dyn ExecutionStateStore>,
    locks: Arc<WorkflowLockManager>,
    preflight: PreflightGate,
    orchestrator: Arc<PhaseOrchestrator>,
    lock_scope: LockScope,
    active: Mutex<HashMap<String, CancelHandle>>,
}

impl WorkflowService {
    pub fn new(
        coordination: Arc<dyn CoordinationStore>,
        state: Arc<dyn ExecutionStateStore>,
        locks: Arc<WorkflowLockManager>,
        preflight: PreflightGate,
        orchestrator: Arc<PhaseOrchestrator>,
    ) -> Self {
        Self {
            coordination,
            state,
            locks,
            preflight,
            orchestrator,
            lock_scope: LockScope::default(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_lock_scope(mut self, scope: LockScope) -> Self {
        self.lock_scope = scope;
        self
    }

    /// Insert one record per spec and promote whatever is immediately ready.
    #[instrument(skip(self, specs), fields(phases = specs.len()))]
    pub async fn enqueue(&self, parent_target: &str, specs: &[PhaseSpec]) -> DomainResult<Vec<Uuid>> {
        let existing = self.coordination.list_by_parent(parent_target).await?;
        check_plan(specs, &existing)?;

        let records: Vec<PhaseRecord> = specs.iter().map(|spec| PhaseRecord::new(parent_target, spec)).collect();
        let ids = self.coordination.insert_all(&records).await?;
        self.orchestrator.promote_ready(parent_target).await;

        info!(parent_target = %parent_target, count = ids.len(), "Phases enqueued");
        Ok(ids)
    }

    /// Every record for the target, in phase order.
    pub async fn status(&self, parent_target: &str) -> DomainResult<Vec<PhaseRecord>> {
        self.coordination.list_by_parent(parent_target).await
    }

    /// Current lock on the target, if live.
    pub async fn lock_status(&self, parent_target: &str) -> DomainResult<LockStatus> {
        self.locks.is_locked(parent_target).await
    }

    /// Run a single phase record under a fresh attempt.
    ///
    /// A Completed record is checked for idempotency only: no preflight, no
    /// lock and no executor call.
    #[instrument(skip(self))]
    pub async fn request_execution(&self, queue_id: Uuid, override_cooldown: bool) -> DomainResult<PhaseOutcome> {
        let record = self
            .coordination
            .get(queue_id)
            .await?
            .ok_or(DomainError::PhaseNotFound(queue_id))?;
        let target = record.parent_target.clone();
        let siblings = self.coordination.list_by_parent(&target).await?;

        if record.status == PhaseStatus::Completed {
            return self.completed(record, &siblings).await;
        }

        self.preflight.require(&target, override_cooldown).await?;
        let attempt_id = self.begin_attempt(&target, &siblings).await?;
        let token = self.register(&target).await;

        let result = self.orchestrator.execute_phase(queue_id, attempt_id, token).await;
        self.unregister(&target).await;

        match result {
            Ok(outcome) => {
                self.release(&target, attempt_id).await;
                self.finish_if_done(&target, attempt_id).await?;
                Ok(outcome)
            }
            Err(e) => {
                self.abandon(&target, attempt_id, &siblings).await;
                Err(e)
            }
        }
    }

    /// Walk every ready phase of the target, in order, under one attempt.
    /// Stops at the first phase that does not complete.
    #[instrument(skip(self))]
    pub async fn run_attempt(&self, parent_target: &str, override_cooldown: bool) -> DomainResult<AttemptReport> {
        let records = self.coordination.list_by_parent(parent_target).await?;
        if records.is_empty() {
            return Err(DomainError::InvalidPhasePlan(format!("no phases enqueued for {parent_target}")));
        }
        if all_completed(&records) {
            debug!(parent_target = %parent_target, "Every phase already completed");
            return Ok(AttemptReport { attempt_id: None, outcomes: Vec::new(), finished: true });
        }

        self.preflight.require(parent_target, override_cooldown).await?;
        let attempt_id = self.begin_attempt(parent_target, &records).await?;
        let token = self.register(parent_target).await;

        let mut outcomes = Vec::new();
        let mut executed = HashSet::new();
        loop {
            let next = match self.next_phase(parent_target, &executed).await {
                Ok(next) => next,
                Err(e) => {
                    self.unregister(parent_target).await;
                    self.abandon(parent_target, attempt_id, &records).await;
                    return Err(e);
                }
            };
            let Some(queue_id) = next else { break };
            executed.insert(queue_id);

            match self.orchestrator.execute_phase(queue_id, attempt_id, token.clone()).await {
                Ok(outcome) => {
                    outcomes.push(outcome);
                    if self.lock_scope == LockScope::PerPhase {
                        self.release(parent_target, attempt_id).await;
                    }
                }
                Err(e) => {
                    self.unregister(parent_target).await;
                    self.abandon(parent_target, attempt_id, &records).await;
                    return Err(e);
                }
            }
        }

        self.unregister(parent_target).await;
        self.release(parent_target, attempt_id).await;
        let finished = self.finish_if_done(parent_target, attempt_id).await?;

        info!(
            parent_target = %parent_target,
            attempt_id = %attempt_id,
            phases = outcomes.len(),
            finished,
            "Attempt finished"
        );
        Ok(AttemptReport { attempt_id: Some(attempt_id), outcomes, finished })
    }

    /// Re-queue a Failed phase along with the dependents it blocked.
    #[instrument(skip(self))]
    pub async fn retry(&self, queue_id: Uuid) -> DomainResult<PhaseRecord> {
        let record = self
            .coordination
            .get(queue_id)
            .await?
            .ok_or(DomainError::PhaseNotFound(queue_id))?;
        if record.status != PhaseStatus::Failed {
            return Err(DomainError::InvalidTransition { queue_id, from: record.status, to: PhaseStatus::Queued });
        }

        self.coordination.update_status(queue_id, StatusUpdate::to(PhaseStatus::Queued)).await?;

        let siblings = self.coordination.list_by_parent(&record.parent_target).await?;
        let mut upstream = vec![record.phase_number];
        let mut requeued = 0usize;
        for sibling in &siblings {
            let Some(dep) = sibling.depends_on_phase else { continue };
            if !upstream.contains(&dep) {
                continue;
            }
            upstream.push(sibling.phase_number);
            if sibling.status == PhaseStatus::Blocked {
                self.coordination
                    .update_status(sibling.queue_id, StatusUpdate::to(PhaseStatus::Queued))
                    .await?;
                requeued += 1;
            }
        }

        self.orchestrator.promote_ready(&record.parent_target).await;
        info!(
            queue_id = %queue_id,
            parent_target = %record.parent_target,
            phase = %record.phase_name,
            requeued_dependents = requeued,
            "Phase re-queued"
        );

        self.coordination.get(queue_id).await?.ok_or(DomainError::PhaseNotFound(queue_id))
    }

    /// Stop whatever is running for the target and drop its lock.
    #[instrument(skip(self))]
    pub async fn abort(&self, parent_target: &str) -> DomainResult<AbortReport> {
        let mut report = AbortReport { parent_target: parent_target.to_string(), ..Default::default() };

        let handle = self.active.lock().await.remove(parent_target);
        if let Some(handle) = handle {
            handle.cancel();
            report.signalled = true;
            info!(parent_target = %parent_target, "Signalled in-process attempt to abort");
        } else {
            let records = self.coordination.list_by_parent(parent_target).await?;
            for record in records.iter().filter(|r| r.status == PhaseStatus::Running) {
                let attempt_id = record.attempt_id.unwrap_or_else(Uuid::nil);
                let reason = DomainError::Cancelled { attempt_id }.to_string();
                let failed = self
                    .coordination
                    .update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Failed).with_error(reason.clone()))
                    .await?;
                report.failed.push(failed.phase_name.to_string());

                let blocked = self.orchestrator.block_dependents(&failed).await;
                report.blocked.extend(blocked.iter().cloned());

                if let Some(cleanup) = self.orchestrator.cleanup() {
                    if let Err(e) = cleanup.reclaim(parent_target, attempt_id).await {
                        warn!(parent_target = %parent_target, error = %e, "Cleanup after abort failed");
                    }
                }

                let mut summary = format!("failed: {reason}");
                if !blocked.is_empty() {
                    summary.push_str(&format!("\n\nBlocked phases: {}", blocked.join(", ")));
                }
                self.orchestrator.post_status(&failed, attempt_id, &summary).await;
            }
        }

        report.lock_released = self.locks.force_release(parent_target).await?;
        warn!(
            parent_target = %parent_target,
            signalled = report.signalled,
            failed = report.failed.len(),
            lock_released = report.lock_released,
            "Workflow aborted"
        );
        Ok(report)
    }

    /// Idempotent answer for a Completed record.
    async fn completed(&self, record: PhaseRecord, siblings: &[PhaseRecord]) -> DomainResult<PhaseOutcome> {
        let attempt_id = record.attempt_id.or_else(|| latest_attempt(siblings));
        let Some(attempt_id) = attempt_id else {
            return Ok(PhaseOutcome { record, skipped: true, iterations: 0, warnings: Vec::new() });
        };
        match self.state.load(attempt_id).await {
            Ok(_) => self.orchestrator.execute_phase(record.queue_id, attempt_id, CancelToken::never()).await,
            Err(DomainError::ExecutionStateNotFound(_)) => Ok(PhaseOutcome {
                record,
                skipped: true,
                iterations: 0,
                warnings: vec!["execution state already reclaimed".to_string()],
            }),
            Err(e) => Err(e),
        }
    }

    /// New attempt id holding the target lock, with the previous attempt's
    /// execution state moved over to it.
    async fn begin_attempt(&self, parent_target: &str, records: &[PhaseRecord]) -> DomainResult<Uuid> {
        let attempt_id = Uuid::new_v4();
        self.locks.acquire_or_contend(parent_target, attempt_id).await?;

        if let Some(previous) = latest_attempt(records) {
            if let Err(e) = self.move_state(previous, attempt_id).await {
                self.release(parent_target, attempt_id).await;
                return Err(e);
            }
        }
        info!(parent_target = %parent_target, attempt_id = %attempt_id, "Attempt started");
        Ok(attempt_id)
    }

    /// Re-key an execution state document. A missing source is not an error.
    async fn move_state(&self, from: Uuid, to: Uuid) -> DomainResult<bool> {
        let mut state = match self.state.load(from).await {
            Ok(state) => state,
            Err(DomainError::ExecutionStateNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        state.attempt_id = to;
        state.updated_at = Utc::now();
        self.state.save(&state).await?;
        self.state.delete(from).await?;
        debug!(from = %from, to = %to, "Execution state adopted");
        Ok(true)
    }

    /// An attempt that failed before touching any record hands the state it
    /// adopted back to the attempt it took it from.
    async fn abandon(&self, parent_target: &str, attempt_id: Uuid, before: &[PhaseRecord]) {
        let Some(previous) = latest_attempt(before) else { return };
        let touched = match self.coordination.list_by_parent(parent_target).await {
            Ok(records) => records.iter().any(|r| r.attempt_id == Some(attempt_id)),
            Err(e) => {
                warn!(parent_target = %parent_target, error = %e, "Could not inspect records after failure");
                return;
            }
        };
        if touched {
            return;
        }
        if let Err(e) = self.move_state(attempt_id, previous).await {
            warn!(parent_target = %parent_target, error = %e, "Could not hand execution state back");
        }
    }

    /// Stale Running records first, then the first ready one.
    async fn next_phase(&self, parent_target: &str, executed: &HashSet<Uuid>) -> DomainResult<Option<Uuid>> {
        let records = self.coordination.list_by_parent(parent_target).await?;
        if let Some(stale) = records
            .iter()
            .find(|r| r.status == PhaseStatus::Running && !executed.contains(&r.queue_id))
        {
            return Ok(Some(stale.queue_id));
        }
        Ok(self
            .coordination
            .find_ready(parent_target)
            .await?
            .into_iter()
            .map(|r| r.queue_id)
            .find(|id| !executed.contains(id)))
    }

    /// Reclaim per-attempt resources once every phase is Completed.
    async fn finish_if_done(&self, parent_target: &str, attempt_id: Uuid) -> DomainResult<bool> {
        let records = self.coordination.list_by_parent(parent_target).await?;
        if !all_completed(&records) {
            return Ok(false);
        }
        if let Some(cleanup) = self.orchestrator.cleanup() {
            if let Err(e) = cleanup.reclaim(parent_target, attempt_id).await {
                warn!(parent_target = %parent_target, error = %e, "Cleanup after completion failed");
            }
        }
        Ok(true)
    }

    async fn register(&self, parent_target: &str) -> CancelToken {
        let (handle, token) = CancelToken::pair();
        self.active.lock().await.insert(parent_target.to_string(), handle);
        token
    }

    async fn unregister(&self, parent_target: &str) {
        self.active.lock().await.remove(parent_target);
    }

    async fn release(&self, parent_target: &str, attempt_id: Uuid) {
        if let Err(e) = self.locks.release(parent_target, attempt_id).await {
            warn!(parent_target = %parent_target, attempt_id = %attempt_id, error = %e, "Lock release failed");
        }
    }
}

fn all_completed(records: &[PhaseRecord]) -> bool {
    !records.is_empty() && records.iter().all(|r| r.status == PhaseStatus::Completed)
}

/// Attempt of the most recently updated record that has one.
pub fn latest_attempt(records: &[PhaseRecord]) -> Option<Uuid> {
    records
        .iter()
        .filter(|r| r.attempt_id.is_some())
        .max_by_key(|r| r.updated_at)
        .and_then(|r| r.attempt_id)
}

/// Phase numbers are unique per target and every dependency points at an
/// earlier phase that exists.
fn check_plan(specs: &[PhaseSpec], existing: &[PhaseRecord]) -> DomainResult<()> {
    if specs.is_empty() {
        return Err(DomainError::InvalidPhasePlan("no phases given".to_string()));
    }

    let mut known: HashSet<i64> = existing.iter().map(|r| r.phase_number).collect();
    for spec in specs {
        if !known.insert(spec.phase_number) {
            return Err(DomainError::InvalidPhasePlan(format!(
                "phase number {} is already enqueued",
                spec.phase_number
            )));
        }
    }

    for spec in specs {
        let Some(dep) = spec.depends_on_phase else { continue };
        if dep >= spec.phase_number {
            return Err(DomainError::InvalidPhasePlan(format!(
                "phase {} may only depend on an earlier phase, not {dep}",
                spec.phase_number
            )));
        }
        if !known.contains(&dep) {
            return Err(DomainError::InvalidPhasePlan(format!(
                "phase {} depends on phase {dep}, which is not enqueued",
                spec.phase_number
            )));
        }
    }
    Ok(())
}
