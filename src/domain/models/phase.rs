//! Phase catalogue and per-phase execution policy.
//!
//! The workflow is a fixed, ordered sequence of phases. Each phase carries a
//! static policy describing how the orchestrator treats it: whether a failure
//! blocks the workflow, how a half-finished run is recovered, whether the phase
//! runs a bounded fix loop, and whether its success has to be confirmed against
//! an eventually consistent remote system.

use serde::{Deserialize, Serialize};

/// One step of the issue workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Plan,
    Validate,
    Build,
    Lint,
    Test,
    Review,
    Document,
    Ship,
    Cleanup,
    Verify,
}

impl PhaseName {
    /// Every phase, in workflow order.
    pub const ALL: [PhaseName; 10] = [
        Self::Plan,
        Self::Validate,
        Self::Build,
        Self::Lint,
        Self::Test,
        Self::Review,
        Self::Document,
        Self::Ship,
        Self::Cleanup,
        Self::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Validate => "validate",
            Self::Build => "build",
            Self::Lint => "lint",
            Self::Test => "test",
            Self::Review => "review",
            Self::Document => "document",
            Self::Ship => "ship",
            Self::Cleanup => "cleanup",
            Self::Verify => "verify",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "plan" => Some(Self::Plan),
            "validate" => Some(Self::Validate),
            "build" => Some(Self::Build),
            "lint" => Some(Self::Lint),
            "test" => Some(Self::Test),
            "review" => Some(Self::Review),
            "document" | "docs" => Some(Self::Document),
            "ship" => Some(Self::Ship),
            "cleanup" => Some(Self::Cleanup),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }

    /// 1-based ordinal of this phase in the default chain.
    pub fn ordinal(&self) -> i64 {
        Self::ALL
            .iter()
            .position(|p| p == self)
            .map_or(0, |i| i as i64 + 1)
    }

    pub fn policy(&self) -> PhasePolicy {
        PhasePolicy::for_phase(*self)
    }
}

impl std::fmt::Display for PhaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a previous attempt crashed mid-phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Keep whatever the crashed run produced and run the phase again on top of it.
    Resume,
    /// Drop the phase's partial outputs and run it from scratch.
    CleanRestart,
}

/// Bounded fix loop for phases that report a failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLoop {
    /// Total executor invocations allowed, including the first.
    pub max_attempts: u32,
    /// Whether exhausting the loop still lets the phase complete.
    pub blocking_on_exhaustion: bool,
}

/// Remote state that must become visible before a phase counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCheck {
    /// The pull request created by the phase can be read back.
    PullRequestVisible,
    /// The pull request for the target has actually been merged.
    MergeLanded,
}

impl RemoteCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequestVisible => "pull_request_visible",
            Self::MergeLanded => "merge_landed",
        }
    }
}

/// Static policy for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePolicy {
    pub phase: PhaseName,
    /// Failures are recorded as warnings and the phase still completes.
    pub non_blocking: bool,
    pub recovery: RecoveryPolicy,
    pub retry_loop: Option<RetryLoop>,
    pub remote_check: Option<RemoteCheck>,
}

impl PhasePolicy {
    pub fn for_phase(phase: PhaseName) -> Self {
        let base = Self {
            phase,
            non_blocking: false,
            recovery: RecoveryPolicy::Resume,
            retry_loop: None,
            remote_check: None,
        };

        match phase {
            PhaseName::Plan | PhaseName::Build | PhaseName::Document => Self {
                recovery: RecoveryPolicy::CleanRestart,
                ..base
            },
            PhaseName::Validate | PhaseName::Review => base,
            PhaseName::Lint => Self {
                non_blocking: true,
                retry_loop: Some(RetryLoop { max_attempts: 3, blocking_on_exhaustion: false }),
                ..base
            },
            PhaseName::Test => Self {
                retry_loop: Some(RetryLoop { max_attempts: 3, blocking_on_exhaustion: true }),
                ..base
            },
            PhaseName::Ship => Self {
                remote_check: Some(RemoteCheck::PullRequestVisible),
                ..base
            },
            PhaseName::Cleanup => Self { non_blocking: true, ..base },
            PhaseName::Verify => Self {
                non_blocking: true,
                remote_check: Some(RemoteCheck::MergeLanded),
                ..base
            },
        }
    }

    /// Override the loop bound, keeping the exhaustion behaviour.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        if let Some(ref mut retry) = self.retry_loop {
            retry.max_attempts = max_attempts.max(1);
        }
        self
    }
}
