//! Conductor - multi-phase workflow coordination engine
//!
//! Conductor sequences the phases of an automated job (plan, validate, build,
//! lint, test, review, document, ship, cleanup, verify) for a target such as
//! an issue number. It guarantees that a phase only runs once its dependency
//! completed, that one attempt at a time works on a target, and that an
//! interrupted attempt can be picked up again without redoing finished work.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, the error taxonomy and port traits
//! - **Service Layer** (`services`): lock manager, preflight gate, contract
//!   validation, phase orchestration, verification retries, workflow API
//! - **Adapters** (`adapters`): SQLite stores, file-backed execution state,
//!   process executor, GitHub issue provider
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, ExecutionState, PhaseName, PhaseOutput, PhaseRecord, PhaseSpec, PhaseStatus, WorkflowLock,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{PhaseOrchestrator, WorkflowLockManager, WorkflowService};
