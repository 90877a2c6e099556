//! Conductor CLI entry point.

use clap::Parser;
use std::process::ExitCode;

use conductor::cli::{self, service::build_context, Cli};
use conductor::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return exit(cli::handle_error(&err, cli.json)),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match build_context(&config).await {
        Ok(context) => cli::commands::dispatch(&context, cli.command, cli.json).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit(cli::handle_error(&err, cli.json)),
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
