use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::PhaseName;
use super::phase_record::PhaseStatus;

/// Monotonically increasing sequence number assigned by the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub fn zero() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A status change of one phase record, pushed to dashboards and listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub queue_id: Uuid,
    pub parent_target: String,
    pub attempt_id: Option<Uuid>,
    pub phase: PhaseName,
    pub from: PhaseStatus,
    pub to: PhaseStatus,
}

impl TransitionEvent {
    pub fn new(
        queue_id: Uuid,
        parent_target: impl Into<String>,
        attempt_id: Option<Uuid>,
        phase: PhaseName,
        from: PhaseStatus,
        to: PhaseStatus,
    ) -> Self {
        Self {
            sequence: SequenceNumber::zero(), // assigned on publish
            timestamp: Utc::now(),
            queue_id,
            parent_target: parent_target.into(),
            attempt_id,
            phase,
            from,
            to,
        }
    }
}
