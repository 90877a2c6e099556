//! Infrastructure layer module
//!
//! Process-wide concerns that sit outside the domain: configuration loading
//! and logging initialisation.

pub mod config;
pub mod logging;
