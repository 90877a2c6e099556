//! Command-line surface for the conductor engine.

pub mod commands;
pub mod output;
pub mod service;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::errors::DomainError;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Conductor - multi-phase workflow coordination engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .conductor/config.yaml and .conductor/local.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enqueue phases for a target
    Enqueue {
        /// Target, e.g. an issue number
        target: String,
        /// Comma-separated phases (default: the full ten-phase chain)
        #[arg(short, long, value_delimiter = ',')]
        phases: Vec<String>,
    },
    /// Show every phase record of a target
    Status {
        target: String,
    },
    /// Run a single phase record
    Run {
        /// Queue ID of the phase record
        queue_id: String,
        /// Ignore the cooldown since the last status comment
        #[arg(long)]
        override_cooldown: bool,
    },
    /// Run every ready phase of a target under one attempt
    RunAll {
        target: String,
        /// Ignore the cooldown since the last status comment
        #[arg(long)]
        override_cooldown: bool,
    },
    /// Re-queue a failed phase and the phases it blocked
    Retry {
        /// Queue ID of the failed phase record
        queue_id: String,
    },
    /// Abort the running attempt on a target and release its lock
    Abort {
        target: String,
    },
    /// Show who holds the lock on a target
    Lock {
        target: String,
    },
}

/// Load configuration, from `path` when given.
pub fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Exit code for an error: the code of the first domain error in the chain, else 1.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DomainError>())
        .map_or(1, DomainError::exit_code)
}

/// Report an error on the right stream and return the process exit code.
pub fn handle_error(err: &anyhow::Error, json: bool) -> i32 {
    let code = exit_code_for(err);
    if json {
        let recoverable = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<DomainError>())
            .is_some_and(DomainError::is_recoverable);
        let body = serde_json::json!({
            "error": format!("{err:#}"),
            "exit_code": code,
            "recoverable": recoverable,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    code
}
