//! Application services built on the domain ports.

pub mod event_bus;
pub mod lock_manager;
pub mod phase_orchestrator;
pub mod preflight;
pub mod state_validator;
pub mod verification_retrier;
pub mod workflow_service;

pub use event_bus::{EventBus, EventBusConfig};
pub use lock_manager::WorkflowLockManager;
pub use phase_orchestrator::{
    status_comment, CancelHandle, CancelToken, PhaseOrchestrator, PhaseOrchestratorConfig, PhaseOutcome,
};
pub use preflight::{PreflightGate, PreflightReport};
pub use state_validator::{contract_for, PhaseContract, StateValidator};
pub use verification_retrier::{Probe, RetryPolicy, Verdict, VerificationRetrier};
pub use workflow_service::{AbortReport, AttemptReport, WorkflowService};
