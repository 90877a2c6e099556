//! Coordination records: one row per phase of a multi-phase job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::PhaseName;

/// Status of a phase record in the coordination store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Enqueued, waiting on its dependency
    #[default]
    Queued,
    /// Dependency satisfied, may be picked up
    Ready,
    /// Currently executing under an attempt
    Running,
    /// Finished with valid outputs
    Completed,
    /// A dependency never completed
    Blocked,
    /// Execution or validation failed
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" | "pending" => Some(Self::Queued),
            "ready" => Some(Self::Ready),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal for the current attempt. `Blocked` and `Failed` can be re-queued by a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }

    /// Valid transitions from this status.
    ///
    /// `Running -> Running` only reclaims a record whose attempt crashed.
    /// `Blocked -> Queued` only happens while retrying the failed upstream phase.
    pub fn valid_transitions(&self) -> Vec<PhaseStatus> {
        match self {
            Self::Queued => vec![Self::Ready, Self::Blocked, Self::Failed],
            Self::Ready => vec![Self::Running, Self::Blocked, Self::Failed],
            Self::Running => vec![Self::Completed, Self::Failed, Self::Blocked, Self::Running],
            Self::Completed => vec![],
            Self::Blocked => vec![Self::Queued],
            Self::Failed => vec![Self::Queued],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asks for when planning a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub phase: PhaseName,
    pub phase_number: i64,
    pub depends_on_phase: Option<i64>,
    #[serde(default)]
    pub priority: i64,
}

impl PhaseSpec {
    pub fn new(phase: PhaseName) -> Self {
        Self {
            phase,
            phase_number: phase.ordinal(),
            depends_on_phase: None,
            priority: 0,
        }
    }

    pub fn depends_on(mut self, phase_number: i64) -> Self {
        self.depends_on_phase = Some(phase_number);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Chain the given phases in order, each depending on the one before it.
    pub fn chain(phases: &[PhaseName]) -> Vec<Self> {
        let mut specs: Vec<Self> = Vec::with_capacity(phases.len());
        for phase in phases {
            let mut spec = Self::new(*phase);
            if let Some(prev) = specs.last() {
                spec = spec.depends_on(prev.phase_number);
            }
            specs.push(spec);
        }
        specs
    }

    /// The full ten-phase workflow.
    pub fn default_chain() -> Vec<Self> {
        Self::chain(&PhaseName::ALL)
    }
}

/// One phase of one job, as stored in the coordination store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub queue_id: Uuid,
    pub parent_target: String,
    pub phase_number: i64,
    pub phase_name: PhaseName,
    /// External id learnt during execution, e.g. the created issue number.
    pub resolved_target: Option<String>,
    pub status: PhaseStatus,
    pub depends_on_phase: Option<i64>,
    pub attempt_id: Option<Uuid>,
    pub priority: i64,
    pub queue_position: i64,
    pub error_message: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    pub fn new(parent_target: impl Into<String>, spec: &PhaseSpec) -> Self {
        let now = Utc::now();
        Self {
            queue_id: Uuid::new_v4(),
            parent_target: parent_target.into(),
            phase_number: spec.phase_number,
            phase_name: spec.phase,
            resolved_target: None,
            status: PhaseStatus::Queued,
            depends_on_phase: spec.depends_on_phase,
            attempt_id: None,
            priority: spec.priority,
            queue_position: spec.phase_number,
            error_message: None,
            version: 1,
            created_at: now,
            updated_at: now,
            ready_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_resolved_target(mut self, target: impl Into<String>) -> Self {
        self.resolved_target = Some(target.into());
        self
    }

    pub fn has_dependency(&self) -> bool {
        self.depends_on_phase.is_some()
    }
}

/// Arguments for a status change through the coordination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PhaseStatus,
    /// Attempt that owns the change. Required when moving to `Running`.
    pub attempt_id: Option<Uuid>,
    pub error_message: Option<String>,
    /// Set the resolved target alongside the transition.
    pub resolved_target: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: PhaseStatus) -> Self {
        Self { status, attempt_id: None, error_message: None, resolved_target: None }
    }

    pub fn by(mut self, attempt_id: Uuid) -> Self {
        self.attempt_id = Some(attempt_id);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn resolving(mut self, target: Option<String>) -> Self {
        self.resolved_target = target;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        assert!(PhaseStatus::Queued.can_transition_to(PhaseStatus::Ready));
        assert!(PhaseStatus::Ready.can_transition_to(PhaseStatus::Running));
        assert!(PhaseStatus::Running.can_transition_to(PhaseStatus::Completed));
        assert!(PhaseStatus::Failed.can_transition_to(PhaseStatus::Queued));

        assert!(!PhaseStatus::Completed.can_transition_to(PhaseStatus::Running));
        assert!(!PhaseStatus::Completed.can_transition_to(PhaseStatus::Queued));
        assert!(!PhaseStatus::Running.can_transition_to(PhaseStatus::Ready));
        assert!(!PhaseStatus::Queued.can_transition_to(PhaseStatus::Running));
        assert!(!PhaseStatus::Failed.can_transition_to(PhaseStatus::Ready));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            PhaseStatus::Queued,
            PhaseStatus::Ready,
            PhaseStatus::Running,
            PhaseStatus::Completed,
            PhaseStatus::Blocked,
            PhaseStatus::Failed,
        ] {
            assert_eq!(PhaseStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PhaseStatus::from_str("complete"), Some(PhaseStatus::Completed));
        assert_eq!(PhaseStatus::from_str("done"), None);
    }

    #[test]
    fn test_default_chain_is_linear() {
        let chain = PhaseSpec::default_chain();
        assert_eq!(chain.len(), 10);
        assert_eq!(chain[0].phase, PhaseName::Plan);
        assert_eq!(chain[0].depends_on_phase, None);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].depends_on_phase, Some(pair[0].phase_number));
        }
    }

    #[test]
    fn test_chain_of_subset_keeps_ordinals() {
        let chain = PhaseSpec::chain(&[PhaseName::Build, PhaseName::Test]);
        assert_eq!(chain[0].phase_number, 3);
        assert_eq!(chain[1].phase_number, 5);
        assert_eq!(chain[1].depends_on_phase, Some(3));
    }

    #[test]
    fn test_new_record_is_queued() {
        let record = PhaseRecord::new("42", &PhaseSpec::new(PhaseName::Plan));
        assert_eq!(record.status, PhaseStatus::Queued);
        assert_eq!(record.queue_position, 1);
        assert!(record.attempt_id.is_none());
        assert!(!record.has_dependency());
    }
}
