//! Phase contract checks.
//!
//! Each phase declares what it needs before it runs and what it must leave
//! behind. Checks only read: the coordination store for dependency status,
//! the attempt's execution state for typed outputs, and the filesystem for
//! artifacts those outputs point at.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionState, PhaseName, PhaseRecord, PhaseStatus, ValidationResult};
use crate::domain::ports::{CoordinationStore, ExecutionStateStore};

/// Something a phase contract asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// A typed output for the phase is stored in the execution state.
    Output(PhaseName),
    /// That output reports zero outstanding failures.
    Clean(PhaseName),
    /// Every artifact path listed by that output exists.
    Artifacts(PhaseName),
    /// The record's `depends_on_phase` is Completed.
    DependencyCompleted,
}

/// Required items produce errors, optional ones only warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Unmet means the contract fails.
    Required,
    /// Unmet is reported as a warning.
    Optional,
}

/// One requirement with its severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractItem {
    pub requirement: Requirement,
    pub level: Level,
}

const fn req(requirement: Requirement) -> ContractItem {
    ContractItem { requirement, level: Level::Required }
}

const fn opt(requirement: Requirement) -> ContractItem {
    ContractItem { requirement, level: Level::Optional }
}

/// What a phase needs before it runs and must leave behind afterwards.
#[derive(Debug, Clone, Copy)]
pub struct PhaseContract {
    pub inputs: &'static [ContractItem],
    pub outputs: &'static [ContractItem],
}

use PhaseName as P;
use Requirement::{Artifacts, Clean, DependencyCompleted, Output};

const PLAN_INPUTS: &[ContractItem] = &[];
const PLAN_OUTPUTS: &[ContractItem] = &[req(Output(P::Plan)), req(Artifacts(P::Plan))];
const VALIDATE_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Plan)), req(Artifacts(P::Plan))];
const VALIDATE_OUTPUTS: &[ContractItem] = &[req(Output(P::Validate)), req(Clean(P::Validate))];
const BUILD_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Plan))];
const BUILD_OUTPUTS: &[ContractItem] = &[req(Output(P::Build)), req(Artifacts(P::Build))];
const LINT_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Build))];
const LINT_OUTPUTS: &[ContractItem] = &[opt(Output(P::Lint)), opt(Clean(P::Lint))];
const TEST_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Build))];
const TEST_OUTPUTS: &[ContractItem] = &[req(Output(P::Test)), req(Clean(P::Test))];
const REVIEW_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Test)), req(Clean(P::Test))];
const REVIEW_OUTPUTS: &[ContractItem] = &[req(Output(P::Review)), req(Clean(P::Review))];
const DOCUMENT_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Build)), opt(Output(P::Review))];
const DOCUMENT_OUTPUTS: &[ContractItem] = &[opt(Output(P::Document)), opt(Artifacts(P::Document))];
const SHIP_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Build)), req(Output(P::Test))];
const SHIP_OUTPUTS: &[ContractItem] = &[req(Output(P::Ship))];
const CLEANUP_INPUTS: &[ContractItem] = &[req(DependencyCompleted), opt(Output(P::Ship))];
const CLEANUP_OUTPUTS: &[ContractItem] = &[opt(Output(P::Cleanup))];
const VERIFY_INPUTS: &[ContractItem] = &[req(DependencyCompleted), req(Output(P::Ship))];
const VERIFY_OUTPUTS: &[ContractItem] = &[opt(Output(P::Verify)), opt(Clean(P::Verify))];

/// The static contract table.
pub fn contract_for(phase: PhaseName) -> PhaseContract {
    let (inputs, outputs) = match phase {
        P::Plan => (PLAN_INPUTS, PLAN_OUTPUTS),
        P::Validate => (VALIDATE_INPUTS, VALIDATE_OUTPUTS),
        P::Build => (BUILD_INPUTS, BUILD_OUTPUTS),
        P::Lint => (LINT_INPUTS, LINT_OUTPUTS),
        P::Test => (TEST_INPUTS, TEST_OUTPUTS),
        P::Review => (REVIEW_INPUTS, REVIEW_OUTPUTS),
        P::Document => (DOCUMENT_INPUTS, DOCUMENT_OUTPUTS),
        P::Ship => (SHIP_INPUTS, SHIP_OUTPUTS),
        P::Cleanup => (CLEANUP_INPUTS, CLEANUP_OUTPUTS),
        P::Verify => (VERIFY_INPUTS, VERIFY_OUTPUTS),
    };
    PhaseContract { inputs, outputs }
}

/// Evaluates phase contracts against stored records and execution state.
pub struct StateValidator {
    coordination: Arc<dyn CoordinationStore>,
    state: Arc<dyn ExecutionStateStore>,
    workspace_root: PathBuf,
}

impl StateValidator {
    pub fn new(
        coordination: Arc<dyn CoordinationStore>,
        state: Arc<dyn ExecutionStateStore>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self { coordination, state, workspace_root: workspace_root.into() }
    }

    /// Check the contract before the phase runs.
    pub async fn validate_inputs(&self, record: &PhaseRecord, attempt_id: Uuid) -> DomainResult<ValidationResult> {
        let contract = contract_for(record.phase_name);
        self.evaluate(record, attempt_id, contract.inputs, "inputs").await
    }

    /// Check what the phase left behind.
    pub async fn validate_outputs(&self, record: &PhaseRecord, attempt_id: Uuid) -> DomainResult<ValidationResult> {
        let contract = contract_for(record.phase_name);
        self.evaluate(record, attempt_id, contract.outputs, "outputs").await
    }

    async fn load_state(&self, record: &PhaseRecord, attempt_id: Uuid) -> DomainResult<ExecutionState> {
        match self.state.load(attempt_id).await {
            Ok(state) => Ok(state),
            Err(DomainError::ExecutionStateNotFound(_)) => {
                Ok(ExecutionState::new(attempt_id, record.parent_target.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn evaluate(
        &self,
        record: &PhaseRecord,
        attempt_id: Uuid,
        items: &[ContractItem],
        stage: &str,
    ) -> DomainResult<ValidationResult> {
        let state = self.load_state(record, attempt_id).await?;
        let siblings = self.coordination.list_by_parent(&record.parent_target).await?;
        let mut result = ValidationResult::valid();

        for item in items {
            let level = match item.requirement {
                // A predecessor that was never enqueued for this job cannot
                // have produced anything; its absence is only a warning.
                Output(p) | Clean(p) | Artifacts(p)
                    if p != record.phase_name && !siblings.iter().any(|s| s.phase_name == p) =>
                {
                    Level::Optional
                }
                _ => item.level,
            };

            let Some(problem) = self.check(record, &state, &siblings, item.requirement) else {
                continue;
            };
            match level {
                Level::Required => result.error(problem),
                Level::Optional => result.warning(problem),
            }
        }

        if result.is_valid {
            debug!(
                phase = %record.phase_name,
                parent_target = %record.parent_target,
                stage,
                warnings = result.warnings.len(),
                "Contract satisfied"
            );
        } else {
            warn!(
                phase = %record.phase_name,
                parent_target = %record.parent_target,
                stage,
                errors = ?result.errors,
                "Contract violated"
            );
        }
        Ok(result)
    }

    /// `Some(message)` when the requirement is not met.
    fn check(
        &self,
        record: &PhaseRecord,
        state: &ExecutionState,
        siblings: &[PhaseRecord],
        requirement: Requirement,
    ) -> Option<String> {
        match requirement {
            Output(phase) => state
                .output(phase)
                .is_none()
                .then(|| format!("missing {phase} output in execution state")),
            Clean(phase) => {
                let failures = state.output(phase)?.failure_count();
                (failures > 0).then(|| format!("{phase} output reports {failures} outstanding failures"))
            }
            Artifacts(phase) => {
                let missing: Vec<String> = state
                    .output(phase)?
                    .artifact_paths()
                    .into_iter()
                    .filter(|path| !self.resolve(path).exists())
                    .collect();
                (!missing.is_empty()).then(|| format!("{phase} artifacts missing: {}", missing.join(", ")))
            }
            DependencyCompleted => {
                let dependency = record.depends_on_phase?;
                match siblings.iter().find(|s| s.phase_number == dependency) {
                    Some(dep) if dep.status == PhaseStatus::Completed => None,
                    Some(dep) => Some(format!(
                        "dependency phase {} ({}) is {}",
                        dep.phase_number, dep.phase_name, dep.status
                    )),
                    None => Some(format!("dependency phase {dependency} does not exist")),
                }
            }
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fs::FileExecutionStateStore;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteCoordinationStore};
    use crate::domain::models::{
        BuildResult, LintResult, PhaseOutput, PhaseSpec, PlanResult, StatusUpdate, TestResult,
    };

    struct Fixture {
        validator: StateValidator,
        coordination: Arc<SqliteCoordinationStore>,
        state: Arc<FileExecutionStateStore>,
        dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let coordination = Arc::new(SqliteCoordinationStore::new(create_migrated_test_pool().await.unwrap()));
        let state = Arc::new(FileExecutionStateStore::new(dir.path().join("state")));
        let validator = StateValidator::new(coordination.clone(), state.clone(), dir.path());
        Fixture { validator, coordination, state, dir }
    }

    async fn enqueue(fx: &Fixture, phases: &[PhaseName]) -> Vec<PhaseRecord> {
        let records: Vec<PhaseRecord> =
            PhaseSpec::chain(phases).iter().map(|spec| PhaseRecord::new("42", spec)).collect();
        fx.coordination.insert_all(&records).await.unwrap();
        records
    }

    async fn complete(fx: &Fixture, record: &PhaseRecord, attempt: Uuid) {
        let store = &fx.coordination;
        store.update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Ready)).await.unwrap();
        store.update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Running).by(attempt)).await.unwrap();
        store.update_status(record.queue_id, StatusUpdate::to(PhaseStatus::Completed)).await.unwrap();
    }

    async fn store_output(fx: &Fixture, attempt: Uuid, output: PhaseOutput) {
        let mut state = fx.state.load(attempt).await.unwrap_or_else(|_| ExecutionState::new(attempt, "42"));
        state.set_output(&output);
        fx.state.save(&state).await.unwrap();
    }

    #[test]
    fn test_every_phase_but_plan_checks_its_dependency() {
        for phase in PhaseName::ALL {
            let has_dep = contract_for(phase)
                .inputs
                .iter()
                .any(|item| item.requirement == DependencyCompleted);
            assert_eq!(has_dep, phase != PhaseName::Plan, "{phase}");
        }
    }

    #[tokio::test]
    async fn test_plan_outputs_require_artifact_on_disk() {
        let fx = fixture().await;
        let records = enqueue(&fx, &[PhaseName::Plan]).await;
        let attempt = Uuid::new_v4();

        let result = fx.validator.validate_outputs(&records[0], attempt).await.unwrap();
        assert!(!result.is_valid);

        store_output(&fx, attempt, PhaseOutput::Plan(PlanResult { plan_path: "plan.md".into(), steps: vec![] })).await;
        let result = fx.validator.validate_outputs(&records[0], attempt).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("plan.md"));

        std::fs::write(fx.dir.path().join("plan.md"), "# plan").unwrap();
        assert!(fx.validator.validate_outputs(&records[0], attempt).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_build_inputs_need_plan_and_completed_dependency() {
        let fx = fixture().await;
        let records = enqueue(&fx, &[PhaseName::Plan, PhaseName::Build]).await;
        let attempt = Uuid::new_v4();

        let result = fx.validator.validate_inputs(&records[1], attempt).await.unwrap();
        assert_eq!(result.errors.len(), 2);

        store_output(&fx, attempt, PhaseOutput::Plan(PlanResult { plan_path: "p.md".into(), steps: vec![] })).await;
        complete(&fx, &records[0], attempt).await;
        assert!(fx.validator.validate_inputs(&records[1], attempt).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_predecessor_not_enqueued_is_a_warning() {
        let fx = fixture().await;
        let records = enqueue(&fx, &[PhaseName::Build]).await;

        let result = fx.validator.validate_inputs(&records[0], Uuid::new_v4()).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_optional_outputs_only_warn() {
        let fx = fixture().await;
        let records = enqueue(&fx, &[PhaseName::Lint]).await;
        let attempt = Uuid::new_v4();

        let result = fx.validator.validate_outputs(&records[0], attempt).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);

        store_output(&fx, attempt, PhaseOutput::Lint(LintResult { issues_remaining: 4, issues_fixed: 0 })).await;
        let result = fx.validator.validate_outputs(&records[0], attempt).await.unwrap();
        assert!(result.is_valid);
        assert!(result.warnings[0].contains("4 outstanding"));
    }

    #[tokio::test]
    async fn test_failing_tests_invalidate_outputs() {
        let fx = fixture().await;
        let records = enqueue(&fx, &[PhaseName::Test]).await;
        let attempt = Uuid::new_v4();
        store_output(&fx, attempt, PhaseOutput::Build(BuildResult { branch: "b".into(), ..Default::default() })).await;
        store_output(&fx, attempt, PhaseOutput::Test(TestResult { passed: 3, failed: 1, failing_tests: vec![] })).await;

        let result = fx.validator.validate_outputs(&records[0], attempt).await.unwrap();
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_validation_does_not_create_state() {
        let fx = fixture().await;
        let records = enqueue(&fx, &[PhaseName::Plan]).await;
        let attempt = Uuid::new_v4();
        fx.validator.validate_outputs(&records[0], attempt).await.unwrap();
        assert!(!fx.state.path_for(attempt).exists());
    }
}
