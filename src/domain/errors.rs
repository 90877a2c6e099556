//! Domain errors for the conductor workflow engine.

use thiserror::Error;
use uuid::Uuid;

use super::models::{PhaseName, PhaseStatus};

/// Format a list of reasons as a single `; `-separated line.
fn format_reasons(reasons: &[String]) -> String {
    reasons.join("; ")
}

/// Which side of a phase body a contract check ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    Inputs,
    Outputs,
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inputs => write!(f, "inputs"),
            Self::Outputs => write!(f, "outputs"),
        }
    }
}

/// Domain-level errors that can occur while coordinating a workflow.
///
/// The first seven variants are the engine's public taxonomy; each maps to a
/// distinct process exit code via [`DomainError::exit_code`].
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Preflight rejected for target {target}: {}", format_reasons(.reasons))]
    PreflightRejected { target: String, reasons: Vec<String> },

    #[error("Target {target} is locked by attempt {holder}")]
    LockContention { target: String, holder: Uuid },

    #[error("Invalid state transition for phase record {queue_id} from {from} to {to}")]
    InvalidTransition { queue_id: Uuid, from: PhaseStatus, to: PhaseStatus },

    #[error("Execution state may not contain reserved key '{key}'")]
    SchemaViolation { key: String },

    #[error("Phase {phase} {stage} failed validation: {}", format_reasons(.errors))]
    ValidationFailed { phase: PhaseName, stage: ValidationStage, errors: Vec<String> },

    #[error("Phase {phase} made no progress after {attempts} attempts ({failures} failures remaining)")]
    NoProgress { phase: PhaseName, attempts: u32, failures: u32 },

    #[error("Verification '{check}' inconclusive after {attempts} attempts")]
    VerificationInconclusive { check: String, attempts: u32 },

    #[error("Phase {phase} failed: {message}")]
    PhaseFailed { phase: PhaseName, message: String },

    #[error("Phase {phase} did not finish within {seconds}s")]
    PhaseTimedOut { phase: PhaseName, seconds: u64 },

    #[error("Attempt {attempt_id} was cancelled")]
    Cancelled { attempt_id: Uuid },

    #[error("Invalid phase plan: {0}")]
    InvalidPhasePlan(String),

    #[error("Phase record not found: {0}")]
    PhaseNotFound(Uuid),

    #[error("Execution state not found for attempt {0}")]
    ExecutionStateNotFound(Uuid),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Issue provider error: {0}")]
    ProviderError(String),

    #[error("Phase executor error: {0}")]
    ExecutorError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DomainError {
    /// Process exit code for this error. Taxonomy members map 1:1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PreflightRejected { .. } => 10,
            Self::LockContention { .. } => 11,
            Self::InvalidTransition { .. } => 12,
            Self::SchemaViolation { .. } => 13,
            Self::ValidationFailed { .. } => 14,
            Self::NoProgress { .. } => 15,
            Self::VerificationInconclusive { .. } => 16,
            Self::PhaseFailed { .. } => 17,
            Self::PhaseTimedOut { .. } => 18,
            Self::Cancelled { .. } => 19,
            _ => 1,
        }
    }

    /// Whether the caller can reasonably retry later without human intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PreflightRejected { .. }
                | Self::LockContention { .. }
                | Self::ValidationFailed { .. }
                | Self::VerificationInconclusive { .. }
                | Self::PhaseTimedOut { .. }
                | Self::ConcurrencyConflict { .. }
        )
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::IoError(err.to_string())
    }
}
