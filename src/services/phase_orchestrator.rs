//! Phase Orchestrator service.
//!
//! Drives a single phase record through `Ready -> Running -> {Completed |
//! Failed | Blocked}`. The phase body itself is delegated to a
//! [`PhaseExecutor`]; the orchestrator owns everything around it: the
//! idempotency check, crash recovery, contract validation, bounded fix loops,
//! remote confirmation, status bookkeeping and status comments.
//!
//! Lock ownership: the orchestrator (re)acquires the target lock for the
//! attempt before touching a record and releases it on every failure. On
//! success it only refreshes the TTL; the caller decides when to release.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::lock_manager::WorkflowLockManager;
use super::state_validator::StateValidator;
use super::verification_retrier::{Probe, Verdict, VerificationRetrier};
use crate::domain::errors::{DomainError, DomainResult, ValidationStage};
use crate::domain::models::{
    ExecutionState, PhaseName, PhaseOutput, PhasePolicy, PhaseRecord, PhaseStatus, RecoveryPolicy,
    RemoteCheck, RetryConfig, StatusUpdate,
};
use crate::domain::ports::{
    CleanupCollaborator, CoordinationStore, ExecutionStateStore, IssueProvider, PhaseExecution,
    PhaseExecutor, PhaseRequest, PullRequestState, STATUS_MARKER,
};

/// Configuration for the phase orchestrator.
#[derive(Debug, Clone)]
pub struct PhaseOrchestratorConfig {
    /// Ceiling for one executor invocation.
    pub phase_timeout: Duration,
    /// Fix-loop ceiling for the test phase.
    pub test_max_attempts: u32,
    /// Fix-loop ceiling for the lint phase.
    pub lint_max_attempts: u32,
}

impl Default for PhaseOrchestratorConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            phase_timeout: Duration::from_secs(60 * 60),
            test_max_attempts: retry.test_max_attempts,
            lint_max_attempts: retry.lint_max_attempts,
        }
    }
}

impl PhaseOrchestratorConfig {
    fn policy(&self, phase: PhaseName) -> PhasePolicy {
        let policy = phase.policy();
        match phase {
            PhaseName::Test => policy.with_max_attempts(self.test_max_attempts),
            PhaseName::Lint => policy.with_max_attempts(self.lint_max_attempts),
            _ => policy,
        }
    }
}

/// Sending half of an abort signal.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// Signal every token of the pair. Idempotent.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of an abort signal, checked while the executor runs.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// A connected handle and token.
    pub fn pair() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(Arc::new(tx)), Self(rx))
    }

    /// A token nobody can cancel.
    pub fn never() -> Self {
        Self::pair().1
    }

    /// Whether abort has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender gone: nobody can cancel any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Result of a phase that did not fail.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub record: PhaseRecord,
    /// Already completed with valid outputs; nothing was executed.
    pub skipped: bool,
    /// Executor invocations made for this call.
    pub iterations: u32,
    /// Tolerated problems: non-blocking failures, optional outputs missing.
    pub warnings: Vec<String>,
}

/// How the executor loop ended.
enum LoopEnd {
    Succeeded(PhaseExecution),
    Tolerated(PhaseExecution, String),
    Failed(DomainError),
}

/// Runs one phase record at a time under an attempt's target lock.
pub struct PhaseOrchestrator {
    coordination: Arc<dyn CoordinationStore>,
    state: Arc<dyn ExecutionStateStore>,
    locks: Arc<WorkflowLockManager>,
    validator: Arc<StateValidator>,
    executor: Arc<dyn PhaseExecutor>,
    retrier: VerificationRetrier,
    provider: Option<Arc<dyn IssueProvider>>,
    cleanup: Option<Arc<dyn CleanupCollaborator>>,
    config: PhaseOrchestratorConfig,
}

impl PhaseOrchestrator {
    pub fn new(
        coordination: Arc<dyn CoordinationStore>,
        state: Arc<dyn ExecutionStateStore>,
        locks: Arc<WorkflowLockManager>,
        validator: Arc<StateValidator>,
        executor: Arc<dyn PhaseExecutor>,
        config: PhaseOrchestratorConfig,
    ) -> Self {
        Self {
            coordination,
            state,
            locks,
            validator,
            executor,
            retrier: VerificationRetrier::default(),
            provider: None,
            cleanup: None,
            config,
        }
    }

    pub fn with_retrier(mut self, retrier: VerificationRetrier) -> Self {
        self.retrier = retrier;
        self
    }

    /// Enable remote confirmation and status comments.
    pub fn with_provider(mut self, provider: Arc<dyn IssueProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_cleanup(mut self, cleanup: Arc<dyn CleanupCollaborator>) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn cleanup(&self) -> Option<&Arc<dyn CleanupCollaborator>> {
        self.cleanup.as_ref()
    }

    /// Execute one phase record under `attempt_id`.
    #[instrument(skip(self, cancel))]
    pub async fn execute_phase(
        &self,
        queue_id: Uuid,
        attempt_id: Uuid,
        mut cancel: CancelToken,
    ) -> DomainResult<PhaseOutcome> {
        let record = self
            .coordination
            .get(queue_id)
            .await?
            .ok_or(DomainError::PhaseNotFound(queue_id))?;
        let phase = record.phase_name;
        let target = record.parent_target.clone();

        match record.status {
            PhaseStatus::Completed => return self.completed_outcome(record, attempt_id).await,
            PhaseStatus::Failed | PhaseStatus::Blocked => {
                return Err(DomainError::InvalidTransition {
                    queue_id,
                    from: record.status,
                    to: PhaseStatus::Running,
                });
            }
            PhaseStatus::Queued | PhaseStatus::Ready | PhaseStatus::Running => {}
        }

        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled { attempt_id });
        }

        self.locks.acquire_or_contend(&target, attempt_id).await?;

        let inputs = self.validator.validate_inputs(&record, attempt_id).await?;
        if let Err(e) = inputs.clone().into_result(phase, ValidationStage::Inputs) {
            self.release_quietly(&target, attempt_id).await;
            return Err(e);
        }
        let mut warnings = inputs.warnings;

        let policy = self.config.policy(phase);
        let resume = match self.recover_stale(&record, attempt_id, policy.recovery).await {
            Ok(resume) => resume,
            Err(e) => {
                self.release_quietly(&target, attempt_id).await;
                return Err(e);
            }
        };

        let record = match self.start(record, attempt_id).await {
            Ok(record) => record,
            Err(e) => {
                self.release_quietly(&target, attempt_id).await;
                return Err(e);
            }
        };

        let request = PhaseRequest {
            phase,
            parent_target: target.clone(),
            resolved_target: record.resolved_target.clone(),
            attempt_id,
            iteration: 1,
            resume,
        };

        let (execution, iterations) = match self.run_loop(&policy, request, &mut cancel).await {
            (LoopEnd::Succeeded(execution), n) => (execution, n),
            (LoopEnd::Tolerated(execution, warning), n) => {
                warnings.push(warning);
                (execution, n)
            }
            (LoopEnd::Failed(err), _) => return Err(self.fail(&record, attempt_id, err).await),
        };

        if let Err(e) = self.hold(&target, attempt_id, &cancel).await {
            return Err(self.fail(&record, attempt_id, e).await);
        }

        if let Some(check) = policy.remote_check {
            match self.confirm_remote(check, attempt_id, &target).await {
                Ok(None) => {}
                Ok(Some(warning)) if policy.non_blocking => warnings.push(warning),
                Ok(Some(problem)) => {
                    let err = DomainError::PhaseFailed { phase, message: problem };
                    return Err(self.fail(&record, attempt_id, err).await);
                }
                Err(e) if policy.non_blocking => warnings.push(e.to_string()),
                Err(e) => return Err(self.fail(&record, attempt_id, e).await),
            }
        }

        let outputs = match self.validator.validate_outputs(&record, attempt_id).await {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(&record, attempt_id, e).await),
        };
        if let Err(e) = outputs.clone().into_result(phase, ValidationStage::Outputs) {
            return Err(self.fail(&record, attempt_id, e).await);
        }
        warnings.extend(outputs.warnings);

        if let Err(e) = self.hold(&target, attempt_id, &cancel).await {
            return Err(self.fail(&record, attempt_id, e).await);
        }
        let completed = self
            .coordination
            .update_status(
                record.queue_id,
                StatusUpdate::to(PhaseStatus::Completed)
                    .by(attempt_id)
                    .resolving(execution.resolved_target.clone()),
            )
            .await;
        let record = match completed {
            Ok(record) => record,
            Err(e) => return Err(self.fail(&record, attempt_id, e).await),
        };
        self.promote_ready(&target).await;

        let summary = if warnings.is_empty() {
            "completed".to_string()
        } else {
            format!("completed with warnings: {}", warnings.join("; "))
        };
        self.post_status(&record, attempt_id, &summary).await;

        info!(
            parent_target = %target,
            phase = %phase,
            iterations,
            warnings = warnings.len(),
            "Phase completed"
        );
        Ok(PhaseOutcome { record, skipped: false, iterations, warnings })
    }

    /// Idempotency path for an already completed record.
    async fn completed_outcome(&self, record: PhaseRecord, attempt_id: Uuid) -> DomainResult<PhaseOutcome> {
        let outputs = self.validator.validate_outputs(&record, attempt_id).await?;
        let outputs = outputs.into_result(record.phase_name, ValidationStage::Outputs)?;
        debug!(
            parent_target = %record.parent_target,
            phase = %record.phase_name,
            "Phase already completed; skipping"
        );
        Ok(PhaseOutcome { record, skipped: true, iterations: 0, warnings: outputs.warnings })
    }

    /// Make sure the attempt has a state document and apply the recovery
    /// policy to leftovers from a crashed run. Returns whether partial
    /// results were kept.
    async fn recover_stale(
        &self,
        record: &PhaseRecord,
        attempt_id: Uuid,
        recovery: RecoveryPolicy,
    ) -> DomainResult<bool> {
        let mut state = match self.state.load(attempt_id).await {
            Ok(state) => state,
            Err(DomainError::ExecutionStateNotFound(_)) => {
                let state = ExecutionState::new(attempt_id, record.parent_target.clone());
                self.state.save(&state).await?;
                state
            }
            Err(e) => return Err(e),
        };

        let leftover = state.output(record.phase_name).is_some();
        let stale = record.status == PhaseStatus::Running || leftover;
        if !stale {
            return Ok(false);
        }

        match recovery {
            RecoveryPolicy::Resume => {
                info!(
                    parent_target = %record.parent_target,
                    phase = %record.phase_name,
                    "Resuming phase over partial results"
                );
                Ok(true)
            }
            RecoveryPolicy::CleanRestart => {
                if state.clear_output(record.phase_name) {
                    self.state.save(&state).await?;
                }
                info!(
                    parent_target = %record.parent_target,
                    phase = %record.phase_name,
                    "Discarded partial results; restarting phase from scratch"
                );
                Ok(false)
            }
        }
    }

    /// Move the record to Running for this attempt.
    async fn start(&self, record: PhaseRecord, attempt_id: Uuid) -> DomainResult<PhaseRecord> {
        let record = if record.status == PhaseStatus::Queued {
            self.coordination.update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Ready)).await?
        } else {
            record
        };

        if record.status == PhaseStatus::Running {
            warn!(
                queue_id = %record.queue_id,
                parent_target = %record.parent_target,
                previous_attempt = ?record.attempt_id,
                attempt_id = %attempt_id,
                "Reclaiming stale running phase"
            );
        }
        self.coordination
            .update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Running).by(attempt_id))
            .await
    }

    /// Invoke the executor, looping for phases with a fix loop.
    async fn run_loop(
        &self,
        policy: &PhasePolicy,
        mut request: PhaseRequest,
        cancel: &mut CancelToken,
    ) -> (LoopEnd, u32) {
        let phase = policy.phase;
        let max_attempts = policy.retry_loop.map_or(1, |r| r.max_attempts.max(1));
        let mut previous_failures: Option<u32> = None;

        for iteration in 1..=max_attempts {
            request.iteration = iteration;
            if let Err(e) = self.hold(&request.parent_target, request.attempt_id, cancel).await {
                return (LoopEnd::Failed(e), iteration);
            }
            let execution = match self.invoke(&request, cancel).await {
                Ok(execution) => execution,
                Err(e @ (DomainError::Cancelled { .. } | DomainError::PhaseTimedOut { .. })) => {
                    return (LoopEnd::Failed(e), iteration);
                }
                Err(e) if policy.non_blocking => {
                    warn!(phase = %phase, error = %e, "Non-blocking phase executor error tolerated");
                    return (LoopEnd::Tolerated(PhaseExecution::default(), e.to_string()), iteration);
                }
                Err(e) => return (LoopEnd::Failed(e), iteration),
            };

            if let Err(e) = self.record_execution(&request, &execution).await {
                return (LoopEnd::Failed(e), iteration);
            }

            let failures = execution.failure_count();
            if execution.is_success() && failures == 0 {
                return (LoopEnd::Succeeded(execution), iteration);
            }

            let describe = || {
                if execution.message.is_empty() {
                    format!("exit code {} with {failures} failures", execution.exit_code)
                } else {
                    execution.message.clone()
                }
            };

            let Some(retry) = policy.retry_loop else {
                if policy.non_blocking {
                    let warning = format!("{phase} failed but does not block: {}", describe());
                    return (LoopEnd::Tolerated(execution, warning), iteration);
                }
                let err = DomainError::PhaseFailed { phase, message: describe() };
                return (LoopEnd::Failed(err), iteration);
            };

            let stalled = previous_failures.is_some_and(|previous| failures >= previous);
            if stalled || iteration == max_attempts {
                let err = DomainError::NoProgress { phase, attempts: iteration, failures };
                if retry.blocking_on_exhaustion {
                    return (LoopEnd::Failed(err), iteration);
                }
                warn!(phase = %phase, failures, iterations = iteration, "Fix loop exhausted; phase does not block");
                return (LoopEnd::Tolerated(execution, err.to_string()), iteration);
            }

            info!(
                phase = %phase,
                iteration,
                failures,
                previous = ?previous_failures,
                "Fix loop iteration left failures; retrying"
            );
            previous_failures = Some(failures);
        }

        // The loop always returns from its final iteration.
        let err = DomainError::NoProgress { phase, attempts: max_attempts, failures: 0 };
        (LoopEnd::Failed(err), max_attempts)
    }

    /// Renew the attempt's lock before the next step. A pending abort wins
    /// over a lock that abort already dropped.
    async fn hold(&self, target: &str, attempt_id: Uuid, cancel: &CancelToken) -> DomainResult<()> {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled { attempt_id });
        }
        self.locks.ensure_held(target, attempt_id).await
    }

    async fn invoke(&self, request: &PhaseRequest, cancel: &mut CancelToken) -> DomainResult<PhaseExecution> {
        let timeout = self.config.phase_timeout;
        debug!(
            phase = %request.phase,
            parent_target = %request.parent_target,
            iteration = request.iteration,
            resume = request.resume,
            "Invoking phase executor"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DomainError::Cancelled { attempt_id: request.attempt_id }),
            result = tokio::time::timeout(timeout, self.executor.execute(request)) => match result {
                Ok(execution) => execution,
                Err(_) => Err(DomainError::PhaseTimedOut { phase: request.phase, seconds: timeout.as_secs() }),
            },
        }
    }

    /// Merge executor metadata and the typed output into the attempt's state.
    async fn record_execution(&self, request: &PhaseRequest, execution: &PhaseExecution) -> DomainResult<()> {
        if execution.metadata.is_empty() && execution.output.is_none() {
            return Ok(());
        }
        let mut state = self.state.load(request.attempt_id).await?;
        state.merge(execution.metadata.clone());
        if let Some(output) = &execution.output {
            if output.phase() != request.phase {
                warn!(
                    phase = %request.phase,
                    reported = %output.phase(),
                    "Executor reported output for a different phase"
                );
            }
            state.set_output(output);
        }
        self.state.save(&state).await
    }

    /// Confirm eventually consistent remote state. `Ok(Some(problem))` means
    /// the remote definitively disagrees.
    async fn confirm_remote(
        &self,
        check: RemoteCheck,
        attempt_id: Uuid,
        target: &str,
    ) -> DomainResult<Option<String>> {
        let Some(provider) = self.provider.clone() else {
            return Ok(Some(format!("{} skipped: no issue provider configured", check.as_str())));
        };
        let state = self.state.load(attempt_id).await?;
        let Some(PhaseOutput::Ship(ship)) = state.output(PhaseName::Ship) else {
            return Ok(Some(format!("{} impossible: no ship output for {target}", check.as_str())));
        };
        let number = ship.pr_number;

        let verdict = self
            .retrier
            .retry(check.as_str(), || {
                let provider = provider.clone();
                async move {
                    let Some(pr) = provider.pull_request(number).await? else {
                        return Ok(Probe::NotYetVisible(format!("pull request #{number} not visible yet")));
                    };
                    Ok(match (check, pr.state) {
                        (RemoteCheck::PullRequestVisible, _) | (RemoteCheck::MergeLanded, PullRequestState::Merged) => {
                            Probe::Confirmed(pr)
                        }
                        (RemoteCheck::MergeLanded, PullRequestState::Open) => {
                            Probe::NotYetVisible(format!("pull request #{number} is still open"))
                        }
                        (RemoteCheck::MergeLanded, PullRequestState::Closed) => {
                            Probe::Absent(format!("pull request #{number} was closed without merging"))
                        }
                    })
                }
            })
            .await?;

        Ok(match verdict {
            Verdict::Confirmed(pr) => {
                info!(check = check.as_str(), pr_number = pr.number, url = %pr.url, "Remote state confirmed");
                None
            }
            Verdict::Absent(reason) => Some(reason),
        })
    }

    /// Mark the record Failed, block its dependents, release the lock and
    /// report. Returns the original error for propagation.
    async fn fail(&self, record: &PhaseRecord, attempt_id: Uuid, err: DomainError) -> DomainError {
        let message = err.to_string();
        error!(
            queue_id = %record.queue_id,
            parent_target = %record.parent_target,
            phase = %record.phase_name,
            exit_code = err.exit_code(),
            error = %message,
            "Phase failed"
        );

        let failed = self
            .coordination
            .update_status(
                record.queue_id,
                StatusUpdate::to(PhaseStatus::Failed).by(attempt_id).with_error(message.clone()),
            )
            .await;
        let record = match failed {
            Ok(updated) => updated,
            Err(e) => {
                error!(queue_id = %record.queue_id, error = %e, "Could not record phase failure");
                record.clone()
            }
        };

        let blocked = self.block_dependents(&record).await;
        self.release_quietly(&record.parent_target, attempt_id).await;

        if matches!(err, DomainError::Cancelled { .. }) {
            if let Some(cleanup) = &self.cleanup {
                if let Err(e) = cleanup.reclaim(&record.parent_target, attempt_id).await {
                    warn!(parent_target = %record.parent_target, error = %e, "Cleanup after cancellation failed");
                }
            }
        }

        let mut summary = format!("failed: {message}");
        if !blocked.is_empty() {
            summary.push_str(&format!("\n\nBlocked phases: {}", blocked.join(", ")));
        }
        self.post_status(&record, attempt_id, &summary).await;
        err
    }

    /// Mark every not-yet-started phase downstream of `failed` as Blocked.
    pub async fn block_dependents(&self, failed: &PhaseRecord) -> Vec<String> {
        let siblings = match self.coordination.list_by_parent(&failed.parent_target).await {
            Ok(siblings) => siblings,
            Err(e) => {
                warn!(parent_target = %failed.parent_target, error = %e, "Could not list dependents");
                return Vec::new();
            }
        };

        let mut upstream = vec![failed.phase_number];
        let mut blocked = Vec::new();
        // Records are ordered by phase number, and dependencies point backwards.
        for sibling in &siblings {
            let Some(dep) = sibling.depends_on_phase else { continue };
            if !upstream.contains(&dep) {
                continue;
            }
            upstream.push(sibling.phase_number);
            if !matches!(sibling.status, PhaseStatus::Queued | PhaseStatus::Ready) {
                continue;
            }
            let reason = format!("dependency phase {} ({}) did not complete", failed.phase_number, failed.phase_name);
            match self
                .coordination
                .update_status(sibling.queue_id, StatusUpdate::to(PhaseStatus::Blocked).with_error(reason))
                .await
            {
                Ok(_) => blocked.push(sibling.phase_name.to_string()),
                Err(e) => warn!(queue_id = %sibling.queue_id, error = %e, "Could not block dependent"),
            }
        }
        blocked
    }

    /// Promote queued records whose dependency just completed.
    pub async fn promote_ready(&self, parent_target: &str) {
        let ready = match self.coordination.find_ready(parent_target).await {
            Ok(ready) => ready,
            Err(e) => {
                warn!(parent_target = %parent_target, error = %e, "Could not compute ready set");
                return;
            }
        };
        for record in ready.into_iter().filter(|r| r.status == PhaseStatus::Queued) {
            if let Err(e) = self
                .coordination
                .update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Ready))
                .await
            {
                warn!(queue_id = %record.queue_id, error = %e, "Could not promote phase to ready");
            }
        }
    }

    async fn release_quietly(&self, target: &str, attempt_id: Uuid) {
        if let Err(e) = self.locks.release(target, attempt_id).await {
            warn!(parent_target = %target, attempt_id = %attempt_id, error = %e, "Lock release failed");
        }
    }

    /// Best-effort status comment on the target.
    pub async fn post_status(&self, record: &PhaseRecord, attempt_id: Uuid, summary: &str) {
        let Some(provider) = &self.provider else { return };
        let body = status_comment(record, attempt_id, summary);
        if let Err(e) = provider.post_status_comment(&record.parent_target, &body).await {
            warn!(parent_target = %record.parent_target, error = %e, "Could not post status comment");
        }
    }
}

/// Markdown body of a status comment, carrying the hidden marker.
pub fn status_comment(record: &PhaseRecord, attempt_id: Uuid, summary: &str) -> String {
    format!(
        "{STATUS_MARKER}\n**conductor** phase `{}` ({}/{}) is **{}**\n\n- attempt: `{attempt_id}`\n- {summary}\n",
        record.phase_name,
        record.phase_number,
        PhaseName::ALL.len(),
        record.status,
    )
}
