//! Command handlers.
//!
//! Each handler takes the built [`AppContext`] plus its arguments, prints
//! through [`output`](crate::cli::output::output) and returns `anyhow::Result`.
//! Domain errors stay in the error chain so the binary can map them to exit
//! codes.

pub mod phases;
pub mod target;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::service::AppContext;
use super::Commands;
use crate::domain::models::TransitionEvent;
use crate::services::EventBus;

/// Dispatch a parsed command.
pub async fn dispatch(context: &AppContext, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Enqueue { target, phases } => phases::handle_enqueue(context, &target, &phases, json).await,
        Commands::Status { target } => phases::handle_status(context, &target, json).await,
        Commands::Run { queue_id, override_cooldown } => {
            phases::handle_run(context, &queue_id, override_cooldown, json).await
        }
        Commands::Retry { queue_id } => phases::handle_retry(context, &queue_id, json).await,
        Commands::RunAll { target, override_cooldown } => {
            target::handle_run_all(context, &target, override_cooldown, json).await
        }
        Commands::Abort { target } => target::handle_abort(context, &target, json).await,
        Commands::Lock { target } => target::handle_lock(context, &target, json).await,
    }
}

pub(crate) fn parse_queue_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("Invalid queue id '{raw}'"))
}

/// Prints phase transitions as they are published while a run is in progress.
pub(crate) struct TransitionPrinter {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TransitionPrinter {
    /// `None` in JSON mode, where only the final result is printed.
    pub(crate) fn start(events: &Arc<EventBus>, json: bool) -> Option<Self> {
        if json {
            return None;
        }
        let mut rx = events.subscribe();
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(event) => print_transition(&event),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = &mut stopped => break,
                }
            }
            while let Ok(event) = rx.try_recv() {
                print_transition(&event);
            }
        });
        Some(Self { stop: Some(stop), handle })
    }

    /// Flush whatever was published and stop.
    pub(crate) async fn finish(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.handle.await;
    }
}

fn print_transition(event: &TransitionEvent) {
    println!(
        "  [{}] {} {}: {} -> {}",
        event.sequence,
        event.parent_target,
        event.phase,
        event.from,
        event.to
    );
}
