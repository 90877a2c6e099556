//! Phase executor adapters.

pub mod process;
pub mod scripted;

pub use process::ProcessPhaseExecutor;
pub use scripted::{ScriptedPhaseExecutor, ScriptedStep};
