//! Scripted phase executor for tests and dry runs.
//!
//! Responses are queued per phase. When a phase has nothing queued the
//! executor answers with a plausible successful output, writing any artifact
//! files that output claims to have produced.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BuildResult, CleanupResult, DocumentResult, LintResult, PhaseName, PhaseOutput, PlanResult,
    ReviewResult, ShipResult, TestResult, ValidateResult, VerifyResult,
};
use crate::domain::ports::{PhaseExecution, PhaseExecutor, PhaseRequest};

/// One scripted reaction to an `execute` call.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Respond(PhaseExecution),
    /// Sleep first, then respond. Used to exercise timeouts and cancellation.
    Delay(Duration, PhaseExecution),
    /// Fail the call itself rather than report a non-zero exit.
    Error(String),
}

/// In-memory executor answering from per-phase queues.
#[derive(Clone)]
pub struct ScriptedPhaseExecutor {
    artifact_dir: PathBuf,
    steps: Arc<Mutex<HashMap<PhaseName, VecDeque<ScriptedStep>>>>,
    calls: Arc<Mutex<Vec<PhaseRequest>>>,
}

impl ScriptedPhaseExecutor {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            steps: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a step for the next call on `phase`.
    pub async fn push(&self, phase: PhaseName, step: ScriptedStep) {
        self.steps.lock().await.entry(phase).or_default().push_back(step);
    }

    /// Queue a plain response for `phase`.
    pub async fn respond(&self, phase: PhaseName, execution: PhaseExecution) {
        self.push(phase, ScriptedStep::Respond(execution)).await;
    }

    /// Every request seen so far, in call order.
    pub async fn calls(&self) -> Vec<PhaseRequest> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_for(&self, phase: PhaseName) -> usize {
        self.calls.lock().await.iter().filter(|r| r.phase == phase).count()
    }

    /// Successful output for `phase`, creating its artifacts on disk.
    pub async fn default_output(&self, request: &PhaseRequest) -> DomainResult<PhaseOutput> {
        let target = &request.parent_target;
        let output = match request.phase {
            PhaseName::Plan => {
                tokio::fs::create_dir_all(&self.artifact_dir).await?;
                let path = self.artifact_dir.join(format!("plan-{target}.md"));
                tokio::fs::write(&path, format!("# Plan for {target}\n")).await?;
                PhaseOutput::Plan(PlanResult {
                    plan_path: path.to_string_lossy().into_owned(),
                    steps: vec!["implement".to_string()],
                })
            }
            PhaseName::Validate => PhaseOutput::Validate(ValidateResult { approved: true, concerns: vec![] }),
            PhaseName::Build => PhaseOutput::Build(BuildResult {
                branch: format!("conductor/{target}"),
                ..Default::default()
            }),
            PhaseName::Lint => PhaseOutput::Lint(LintResult::default()),
            PhaseName::Test => PhaseOutput::Test(TestResult { passed: 1, failed: 0, failing_tests: vec![] }),
            PhaseName::Review => PhaseOutput::Review(ReviewResult { approved: true, comments: vec![] }),
            PhaseName::Document => PhaseOutput::Document(DocumentResult::default()),
            PhaseName::Ship => PhaseOutput::Ship(ShipResult {
                pr_number: 1,
                pr_url: format!("https://example.invalid/pull/{target}"),
                branch: format!("conductor/{target}"),
            }),
            PhaseName::Cleanup => PhaseOutput::Cleanup(CleanupResult::default()),
            PhaseName::Verify => PhaseOutput::Verify(VerifyResult { merged: true, merge_commit: None }),
        };
        Ok(output)
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedPhaseExecutor {
    async fn execute(&self, request: &PhaseRequest) -> DomainResult<PhaseExecution> {
        self.calls.lock().await.push(request.clone());

        let step = self
            .steps
            .lock()
            .await
            .get_mut(&request.phase)
            .and_then(VecDeque::pop_front);

        match step {
            Some(ScriptedStep::Respond(execution)) => Ok(execution),
            Some(ScriptedStep::Delay(delay, execution)) => {
                tokio::time::sleep(delay).await;
                Ok(execution)
            }
            Some(ScriptedStep::Error(message)) => Err(DomainError::ExecutorError(message)),
            None => Ok(PhaseExecution::success(self.default_output(request).await?)),
        }
    }
}
