//! Typed per-phase results.
//!
//! Each phase stores its structured result in the attempt's execution state
//! under `outputs.<phase>`. The enum is tagged by phase name so a stored blob
//! can always be matched back to the phase that produced it.

use serde::{Deserialize, Serialize};

use super::phase::PhaseName;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    pub plan_path: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResult {
    pub approved: bool,
    #[serde(default)]
    pub concerns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub branch: String,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub commits: Vec<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintResult {
    pub issues_remaining: u32,
    #[serde(default)]
    pub issues_fixed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub failing_tests: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(default)]
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentResult {
    #[serde(default)]
    pub files_updated: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipResult {
    pub pr_number: u64,
    pub pr_url: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    #[serde(default)]
    pub reclaimed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub merged: bool,
    #[serde(default)]
    pub merge_commit: Option<String>,
}

/// Structured output of a single phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseOutput {
    Plan(PlanResult),
    Validate(ValidateResult),
    Build(BuildResult),
    Lint(LintResult),
    Test(TestResult),
    Review(ReviewResult),
    Document(DocumentResult),
    Ship(ShipResult),
    Cleanup(CleanupResult),
    Verify(VerifyResult),
}

impl PhaseOutput {
    pub fn phase(&self) -> PhaseName {
        match self {
            Self::Plan(_) => PhaseName::Plan,
            Self::Validate(_) => PhaseName::Validate,
            Self::Build(_) => PhaseName::Build,
            Self::Lint(_) => PhaseName::Lint,
            Self::Test(_) => PhaseName::Test,
            Self::Review(_) => PhaseName::Review,
            Self::Document(_) => PhaseName::Document,
            Self::Ship(_) => PhaseName::Ship,
            Self::Cleanup(_) => PhaseName::Cleanup,
            Self::Verify(_) => PhaseName::Verify,
        }
    }

    /// Outstanding failures reported by the phase. Drives the no-progress check.
    pub fn failure_count(&self) -> u32 {
        match self {
            Self::Lint(r) => r.issues_remaining,
            Self::Test(r) => r.failed,
            Self::Validate(r) if !r.approved => r.concerns.len().max(1) as u32,
            Self::Review(r) if !r.approved => r.comments.len().max(1) as u32,
            Self::Verify(r) if !r.merged => 1,
            _ => 0,
        }
    }

    /// Filesystem paths the phase claims to have produced.
    pub fn artifact_paths(&self) -> Vec<String> {
        match self {
            Self::Plan(r) => vec![r.plan_path.clone()],
            Self::Build(r) => r.worktree_path.iter().cloned().collect(),
            Self::Document(r) => r.files_updated.clone(),
            _ => Vec::new(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
