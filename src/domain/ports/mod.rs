//! Port trait definitions (Hexagonal Architecture)
//!
//! Stores and external collaborators the engine depends on:
//! - CoordinationStore / LockStore: relational coordination state
//! - ExecutionStateStore: per-attempt execution metadata
//! - PhaseExecutor: the external process that does the phase work
//! - IssueProvider: issue tracker and pull request host
//! - Broadcaster: fire-and-forget transition sink
//! - CleanupCollaborator: per-attempt resource reclaim
//! - Clock: time source

pub mod broadcaster;
pub mod cleanup;
pub mod clock;
pub mod coordination_store;
pub mod execution_state_store;
pub mod issue_provider;
pub mod lock_store;
pub mod phase_executor;

pub use broadcaster::{Broadcaster, NullBroadcaster};
pub use cleanup::CleanupCollaborator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordination_store::CoordinationStore;
pub use execution_state_store::ExecutionStateStore;
pub use issue_provider::{IssueProvider, PullRequestRef, PullRequestState, TargetStatus, STATUS_MARKER};
pub use lock_store::LockStore;
pub use phase_executor::{PhaseExecution, PhaseExecutor, PhaseRequest};
