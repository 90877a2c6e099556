//! Filesystem adapters.

pub mod cleanup;
pub mod execution_state_store;

pub use cleanup::StateCleanup;
pub use execution_state_store::FileExecutionStateStore;
