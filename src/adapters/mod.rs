//! Infrastructure adapters for external systems.

pub mod executor;
pub mod fs;
pub mod github;
pub mod sqlite;
