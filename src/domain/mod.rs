//! Domain layer for the conductor workflow engine
//!
//! Models, the error taxonomy, and the ports every adapter implements.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult, ValidationStage};
