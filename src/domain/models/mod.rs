//! Domain models for the workflow coordination engine.

pub mod config;
pub mod event;
pub mod execution_state;
pub mod lock;
pub mod phase;
pub mod phase_output;
pub mod phase_record;
pub mod validation;

pub use config::{
    Config, DatabaseConfig, ExecutorConfig, GithubConfig, LockConfig, LockScope, LoggingConfig,
    PreflightConfig, RetryConfig, VerificationConfig,
};
pub use event::{SequenceNumber, TransitionEvent};
pub use execution_state::{reserved_key_in, ExecutionState, OUTPUTS_KEY, RESERVED_KEYS};
pub use lock::{LockStatus, WorkflowLock};
pub use phase::{PhaseName, PhasePolicy, RecoveryPolicy, RemoteCheck, RetryLoop};
pub use phase_output::{
    BuildResult, CleanupResult, DocumentResult, LintResult, PhaseOutput, PlanResult,
    ReviewResult, ShipResult, TestResult, ValidateResult, VerifyResult,
};
pub use phase_record::{PhaseRecord, PhaseSpec, PhaseStatus, StatusUpdate};
pub use validation::ValidationResult;
