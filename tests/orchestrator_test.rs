//! End-to-end phase orchestration over real stores with a scripted executor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine, engine_with, engine_with_provider, RecordingProvider, TARGET};
use conductor::adapters::executor::ScriptedStep;
use conductor::domain::errors::DomainError;
use conductor::domain::models::{
    ExecutionState, PhaseName, PhaseOutput, PhaseSpec, PhaseStatus, PlanResult, StatusUpdate, TestResult,
};
use conductor::domain::ports::{
    CoordinationStore, ExecutionStateStore, PhaseExecution, PullRequestState, STATUS_MARKER,
};
use conductor::services::{CancelToken, PhaseOrchestratorConfig};
use serde_json::{json, Map};
use uuid::Uuid;

use PhaseName::{Build, Lint, Plan, Validate};

#[tokio::test]
async fn dependent_phase_becomes_ready_only_after_its_dependency_completes() {
    let engine = engine().await;
    let records = engine.enqueue_chain(&[Plan, Validate]).await;

    let ready = engine.coordination.find_ready(TARGET).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].phase_name, Plan);
    assert_eq!(records[1].status, PhaseStatus::Queued);

    let outcome = engine.service.request_execution(records[0].queue_id, false).await.unwrap();
    assert_eq!(outcome.record.status, PhaseStatus::Completed);
    assert!(!outcome.skipped);

    let ready = engine.coordination.find_ready(TARGET).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].phase_name, Validate);
    assert_eq!(engine.record(records[1].queue_id).await.status, PhaseStatus::Ready);

    // A fresh attempt picks up the plan output left by the first one.
    let outcome = engine.service.request_execution(records[1].queue_id, false).await.unwrap();
    assert_eq!(outcome.record.status, PhaseStatus::Completed);
    assert!(engine.records().await.iter().all(|r| r.status == PhaseStatus::Completed));
}

#[tokio::test]
async fn full_workflow_runs_every_phase_once_and_reclaims_state() {
    let provider = Arc::new(RecordingProvider::default());
    let engine = engine_with_provider(provider.clone()).await;
    engine.enqueue_chain(&PhaseName::ALL).await;

    let report = engine.service.run_attempt(TARGET, false).await.unwrap();
    let attempt_id = report.attempt_id.expect("attempt started");

    assert!(report.finished);
    assert_eq!(report.outcomes.len(), PhaseName::ALL.len());
    for phase in PhaseName::ALL {
        assert_eq!(engine.executor.calls_for(phase).await, 1, "{phase} should run exactly once");
    }

    let records = engine.records().await;
    assert!(records.iter().all(|r| r.status == PhaseStatus::Completed));
    assert!(records.iter().all(|r| r.attempt_id == Some(attempt_id)));

    let comments = provider.comments.lock().await.clone();
    assert_eq!(comments.len(), PhaseName::ALL.len());
    assert!(comments.iter().all(|c| c.starts_with(STATUS_MARKER)));

    assert!(matches!(
        engine.state.load(attempt_id).await,
        Err(DomainError::ExecutionStateNotFound(_))
    ));
    assert!(!engine.locks.is_locked(TARGET).await.unwrap().locked);
}

#[tokio::test]
async fn rerunning_a_completed_phase_changes_nothing() {
    let provider = Arc::new(RecordingProvider::default());
    let engine = engine_with_provider(provider.clone()).await;
    let records = engine.enqueue_chain(&[Plan, Validate]).await;
    let plan_id = records[0].queue_id;

    engine.service.request_execution(plan_id, false).await.unwrap();
    let record_before = engine.record(plan_id).await;
    let attempt_id = record_before.attempt_id.unwrap();
    let state_before = engine.state.load(attempt_id).await.unwrap();
    let calls_before = engine.executor.calls().await.len();
    let comments_before = provider.comment_count().await;

    let outcome = engine.service.request_execution(plan_id, false).await.unwrap();

    assert!(outcome.skipped);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(engine.executor.calls().await.len(), calls_before);
    assert_eq!(provider.comment_count().await, comments_before);
    assert_eq!(engine.record(plan_id).await, record_before);
    assert_eq!(engine.state.load(attempt_id).await.unwrap(), state_before);
    assert!(!engine.locks.is_locked(TARGET).await.unwrap().locked);
}

#[tokio::test]
async fn finished_workflow_stays_finished() {
    let provider = Arc::new(RecordingProvider::default());
    let engine = engine_with_provider(provider.clone()).await;
    let records = engine.enqueue_chain(&[Plan, Validate]).await;
    engine.service.run_attempt(TARGET, false).await.unwrap();

    let calls = engine.executor.calls().await.len();
    let comments = provider.comment_count().await;

    let again = engine.service.run_attempt(TARGET, false).await.unwrap();
    assert!(again.finished);
    assert!(again.attempt_id.is_none());

    let outcome = engine.service.request_execution(records[0].queue_id, false).await.unwrap();
    assert!(outcome.skipped);
    assert_eq!(outcome.warnings, vec!["execution state already reclaimed".to_string()]);

    assert_eq!(engine.executor.calls().await.len(), calls);
    assert_eq!(provider.comment_count().await, comments);
}

#[tokio::test]
async fn coordination_keys_are_rejected_by_the_state_store() {
    let engine = engine().await;

    let attempt_id = Uuid::new_v4();
    let state = ExecutionState::new(attempt_id, TARGET).with_field("status", json!("running"));
    let err = engine.state.save(&state).await.unwrap_err();
    assert!(matches!(err, DomainError::SchemaViolation { ref key } if key == "status"));
    assert!(matches!(
        engine.state.load(attempt_id).await,
        Err(DomainError::ExecutionStateNotFound(_))
    ));

    engine.state.save(&ExecutionState::new(attempt_id, TARGET)).await.unwrap();
    let mut patch = Map::new();
    patch.insert("currentPhase".to_string(), json!("build"));
    let err = engine.state.update(attempt_id, patch).await.unwrap_err();
    assert!(matches!(err, DomainError::SchemaViolation { ref key } if key == "currentPhase"));
    assert!(!engine.state.load(attempt_id).await.unwrap().has_field("currentPhase"));
}

#[tokio::test]
async fn executor_metadata_with_coordination_keys_fails_the_phase() {
    let engine = engine().await;
    let records = engine.enqueue_chain(&[Plan]).await;

    let mut metadata = Map::new();
    metadata.insert("status".to_string(), json!("done"));
    let execution = PhaseExecution {
        output: Some(PhaseOutput::Plan(PlanResult { plan_path: "plan.md".into(), steps: vec![] })),
        metadata,
        ..PhaseExecution::default()
    };
    engine.executor.respond(Plan, execution).await;

    let err = engine.service.request_execution(records[0].queue_id, false).await.unwrap_err();
    assert!(matches!(err, DomainError::SchemaViolation { .. }));

    let record = engine.record(records[0].queue_id).await;
    assert_eq!(record.status, PhaseStatus::Failed);
    let state = engine.state.load(record.attempt_id.unwrap()).await.unwrap();
    assert!(!state.has_field("status"));
}

fn failing_tests(failed: u32) -> PhaseExecution {
    PhaseExecution {
        exit_code: 1,
        message: format!("{failed} tests failing"),
        output: Some(PhaseOutput::Test(TestResult {
            passed: 10,
            failed,
            failing_tests: (0..failed).map(|i| format!("case_{i}")).collect(),
        })),
        ..PhaseExecution::default()
    }
}

#[tokio::test]
async fn test_loop_without_progress_stops_early() {
    let engine = engine().await;
    engine.enqueue_chain(&[Build, PhaseName::Test, PhaseName::Review]).await;
    for _ in 0..3 {
        engine.executor.respond(PhaseName::Test, failing_tests(2)).await;
    }

    let err = engine.service.run_attempt(TARGET, false).await.unwrap_err();

    match err {
        DomainError::NoProgress { phase, attempts, failures } => {
            assert_eq!(phase, PhaseName::Test);
            assert_eq!(attempts, 2);
            assert_eq!(failures, 2);
        }
        other => panic!("expected NoProgress, got {other:?}"),
    }
    let calls = engine.executor.calls_for(PhaseName::Test).await;
    assert!(calls <= 3);
    assert_eq!(calls, 2);

    let records = engine.records().await;
    assert_eq!(records[0].status, PhaseStatus::Completed);
    assert_eq!(records[1].status, PhaseStatus::Failed);
    assert_eq!(records[2].status, PhaseStatus::Blocked);
    assert!(!engine.locks.is_locked(TARGET).await.unwrap().locked);
}

#[tokio::test]
async fn non_blocking_lint_failure_is_a_warning() {
    let engine = engine().await;
    engine.enqueue_chain(&[Build, Lint]).await;
    engine.executor.push(Lint, ScriptedStep::Error("linter crashed".into())).await;

    let report = engine.service.run_attempt(TARGET, false).await.unwrap();

    assert!(report.finished);
    let lint = &report.outcomes[1];
    assert_eq!(lint.record.phase_name, Lint);
    assert_eq!(lint.record.status, PhaseStatus::Completed);
    assert!(lint.warnings.iter().any(|w| w.contains("linter crashed")));
}

#[tokio::test]
async fn slow_phase_times_out_and_blocks_dependents() {
    let config = PhaseOrchestratorConfig { phase_timeout: Duration::from_millis(50), ..Default::default() };
    let engine = engine_with(config).await;
    engine.enqueue_chain(&[Plan, Validate]).await;
    engine
        .executor
        .push(Plan, ScriptedStep::Delay(Duration::from_secs(5), PhaseExecution::default()))
        .await;

    let err = engine.service.run_attempt(TARGET, false).await.unwrap_err();
    assert!(matches!(err, DomainError::PhaseTimedOut { phase: PhaseName::Plan, .. }));
    assert!(err.is_recoverable());

    let records = engine.records().await;
    assert_eq!(records[0].status, PhaseStatus::Failed);
    assert_eq!(records[1].status, PhaseStatus::Blocked);
    assert!(!engine.locks.is_locked(TARGET).await.unwrap().locked);
}

#[tokio::test]
async fn abort_cancels_a_running_attempt() {
    let engine = engine().await;
    engine.enqueue_chain(&[Plan, Validate]).await;
    engine
        .executor
        .push(Plan, ScriptedStep::Delay(Duration::from_secs(30), PhaseExecution::default()))
        .await;

    let service = engine.service.clone();
    let run = tokio::spawn(async move { service.run_attempt(TARGET, false).await });

    let mut running = false;
    for _ in 0..200 {
        if engine.records().await[0].status == PhaseStatus::Running {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(running, "plan never started");

    let report = engine.service.abort(TARGET).await.unwrap();
    assert!(report.signalled);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, DomainError::Cancelled { .. }));

    let records = engine.records().await;
    assert_eq!(records[0].status, PhaseStatus::Failed);
    assert_eq!(records[1].status, PhaseStatus::Blocked);
    assert!(!engine.locks.is_locked(TARGET).await.unwrap().locked);
    assert!(matches!(
        engine.state.load(records[0].attempt_id.unwrap()).await,
        Err(DomainError::ExecutionStateNotFound(_))
    ));
}

#[tokio::test]
async fn new_attempt_reclaims_phase_left_running_by_a_crashed_one() {
    let engine = engine().await;
    let records = engine.enqueue_chain(&[Plan, Validate]).await;

    let crashed = Uuid::new_v4();
    engine
        .coordination
        .update_status(records[0].queue_id, StatusUpdate::to(PhaseStatus::Running).by(crashed))
        .await
        .unwrap();
    let mut leftover = ExecutionState::new(crashed, TARGET).with_field("branch", json!("conductor/42"));
    leftover.set_output(&PhaseOutput::Plan(PlanResult {
        plan_path: "half-written.md".into(),
        steps: vec![],
    }));
    engine.state.save(&leftover).await.unwrap();

    let report = engine.service.run_attempt(TARGET, false).await.unwrap();
    let attempt_id = report.attempt_id.unwrap();

    assert!(report.finished);
    assert_ne!(attempt_id, crashed);
    let records = engine.records().await;
    assert!(records.iter().all(|r| r.status == PhaseStatus::Completed));
    assert!(records.iter().all(|r| r.attempt_id == Some(attempt_id)));
    assert_eq!(engine.executor.calls_for(Plan).await, 1);
    assert!(matches!(
        engine.state.load(crashed).await,
        Err(DomainError::ExecutionStateNotFound(_))
    ));
}

#[tokio::test]
async fn failed_phase_can_be_retried_to_completion() {
    let engine = engine().await;
    let records = engine.enqueue_chain(&[Plan, Validate, Build]).await;
    engine.executor.respond(Validate, PhaseExecution::failure(3, "plan rejected")).await;

    let err = engine.service.run_attempt(TARGET, false).await.unwrap_err();
    assert!(matches!(err, DomainError::PhaseFailed { phase: PhaseName::Validate, .. }));
    assert_eq!(engine.record(records[2].queue_id).await.status, PhaseStatus::Blocked);

    let retried = engine.service.retry(records[1].queue_id).await.unwrap();
    assert_eq!(retried.status, PhaseStatus::Ready);
    assert_eq!(engine.record(records[2].queue_id).await.status, PhaseStatus::Queued);

    let report = engine.service.run_attempt(TARGET, false).await.unwrap();
    assert!(report.finished);
    assert_eq!(engine.executor.calls_for(Plan).await, 1);
    assert_eq!(engine.executor.calls_for(Validate).await, 2);
}

#[tokio::test]
async fn enqueue_rejects_plans_that_break_dependency_order() {
    let engine = engine().await;
    let specs = vec![PhaseSpec::new(Plan), PhaseSpec::new(Build).depends_on(7)];

    let err = engine.service.enqueue(TARGET, &specs).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidPhasePlan(_)));
    assert!(engine.records().await.is_empty());
}

#[tokio::test]
async fn ship_fails_when_pull_request_never_becomes_visible() {
    let provider = Arc::new(RecordingProvider::with_pull_request_state(None));
    let engine = engine_with_provider(provider.clone()).await;
    let records = engine.enqueue_chain(&[PhaseName::Ship, PhaseName::Verify]).await;

    let err = engine
        .orchestrator
        .execute_phase(records[0].queue_id, Uuid::new_v4(), CancelToken::never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DomainError::VerificationInconclusive { ref check, attempts: 2 } if check == "pull_request_visible"
    ));
    assert_eq!(provider.lookup_count(), 2);
    assert_eq!(engine.record(records[0].queue_id).await.status, PhaseStatus::Failed);
    assert_eq!(engine.record(records[1].queue_id).await.status, PhaseStatus::Blocked);
    assert!(!engine.locks.is_locked(TARGET).await.unwrap().locked);
}

#[tokio::test]
async fn verify_tolerates_a_pull_request_closed_without_merging() {
    let provider = Arc::new(RecordingProvider::with_pull_request_state(Some(PullRequestState::Closed)));
    let engine = engine_with_provider(provider.clone()).await;
    let records = engine.enqueue_chain(&[PhaseName::Ship, PhaseName::Verify]).await;
    let attempt = Uuid::new_v4();

    // Visibility is all ship needs; a closed PR is visible.
    let ship = engine.orchestrator.execute_phase(records[0].queue_id, attempt, CancelToken::never()).await.unwrap();
    assert_eq!(ship.record.status, PhaseStatus::Completed);
    assert_eq!(provider.lookup_count(), 1);

    let verify = engine.orchestrator.execute_phase(records[1].queue_id, attempt, CancelToken::never()).await.unwrap();
    assert_eq!(verify.record.status, PhaseStatus::Completed);
    assert!(verify.warnings.iter().any(|w| w.contains("closed without merging")), "{:?}", verify.warnings);
    // Closed is definitive, so the backoff is not spent on it.
    assert_eq!(provider.lookup_count(), 2);
}

#[tokio::test]
async fn verify_without_ship_output_warns_and_skips_the_lookup() {
    let provider = Arc::new(RecordingProvider::default());
    let engine = engine_with_provider(provider.clone()).await;
    let records = engine.enqueue_chain(&[PhaseName::Verify]).await;

    let outcome = engine
        .orchestrator
        .execute_phase(records[0].queue_id, Uuid::new_v4(), CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.record.status, PhaseStatus::Completed);
    assert!(outcome.warnings.iter().any(|w| w.contains("no ship output")), "{:?}", outcome.warnings);
    assert_eq!(provider.lookup_count(), 0);
}

#[tokio::test]
async fn ship_without_output_fails() {
    let provider = Arc::new(RecordingProvider::default());
    let engine = engine_with_provider(provider.clone()).await;
    let records = engine.enqueue_chain(&[PhaseName::Ship]).await;
    engine.executor.respond(PhaseName::Ship, PhaseExecution::default()).await;

    let err = engine
        .orchestrator
        .execute_phase(records[0].queue_id, Uuid::new_v4(), CancelToken::never())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::PhaseFailed { phase: PhaseName::Ship, ref message } if message.contains("no ship output")));
    assert_eq!(provider.lookup_count(), 0);
    assert_eq!(engine.record(records[0].queue_id).await.status, PhaseStatus::Failed);
}
