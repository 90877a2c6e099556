//! Target-level commands: run-all, abort, lock.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::phases::PhaseOutcomeOutput;
use super::TransitionPrinter;
use crate::cli::output::{output, CommandOutput};
use crate::cli::service::AppContext;
use crate::domain::models::LockStatus;
use crate::services::{AbortReport, AttemptReport};

#[derive(Debug, Serialize)]
pub struct AttemptOutput {
    pub parent_target: String,
    pub attempt_id: Option<String>,
    pub finished: bool,
    pub phases: Vec<PhaseOutcomeOutput>,
}

impl AttemptOutput {
    fn new(parent_target: &str, report: &AttemptReport) -> Self {
        Self {
            parent_target: parent_target.to_string(),
            attempt_id: report.attempt_id.map(|id| id.to_string()),
            finished: report.finished,
            phases: report.outcomes.iter().map(PhaseOutcomeOutput::from).collect(),
        }
    }
}

impl CommandOutput for AttemptOutput {
    fn to_human(&self) -> String {
        let Some(ref attempt) = self.attempt_id else {
            return format!("Every phase of {} is already completed.", self.parent_target);
        };
        let mut lines = vec![format!("Attempt {attempt} on {}:", self.parent_target)];
        for phase in &self.phases {
            lines.push(format!("  {}", phase.to_human().replace('\n', "\n  ")));
        }
        lines.push(if self.finished {
            "All phases completed.".to_string()
        } else {
            "Stopped with phases still pending.".to_string()
        });
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct AbortOutput {
    #[serde(flatten)]
    pub report: AbortReport,
}

impl CommandOutput for AbortOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut lines = vec![format!("Aborted workflow for {}.", report.parent_target)];
        if report.signalled {
            lines.push("  Signalled the running attempt.".to_string());
        }
        if !report.failed.is_empty() {
            lines.push(format!("  Failed:  {}", report.failed.join(", ")));
        }
        if !report.blocked.is_empty() {
            lines.push(format!("  Blocked: {}", report.blocked.join(", ")));
        }
        lines.push(format!("  Lock released: {}", if report.lock_released { "yes" } else { "no lock held" }));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct LockOutput {
    pub parent_target: String,
    #[serde(flatten)]
    pub status: LockStatus,
}

impl CommandOutput for LockOutput {
    fn to_human(&self) -> String {
        match (self.status.holder, self.status.expires_at) {
            (Some(holder), Some(expires_at)) if self.status.locked => {
                let remaining = (expires_at - Utc::now()).num_minutes().max(0);
                format!(
                    "{} is locked by attempt {holder}\n  expires at {} ({remaining} min left)",
                    self.parent_target,
                    expires_at.to_rfc3339()
                )
            }
            _ => format!("{} is not locked.", self.parent_target),
        }
    }
}

pub async fn handle_run_all(context: &AppContext, target: &str, override_cooldown: bool, json: bool) -> Result<()> {
    let printer = TransitionPrinter::start(&context.events, json);
    let result = context.service.run_attempt(target, override_cooldown).await;
    if let Some(printer) = printer {
        printer.finish().await;
    }

    let report = result.with_context(|| format!("Attempt on {target} stopped"))?;
    output(&AttemptOutput::new(target, &report), json);
    Ok(())
}

pub async fn handle_abort(context: &AppContext, target: &str, json: bool) -> Result<()> {
    let report = context
        .service
        .abort(target)
        .await
        .with_context(|| format!("Failed to abort workflow for {target}"))?;
    output(&AbortOutput { report }, json);
    Ok(())
}

pub async fn handle_lock(context: &AppContext, target: &str, json: bool) -> Result<()> {
    let status = context.service.lock_status(target).await.context("Failed to read lock")?;
    output(&LockOutput { parent_target: target.to_string(), status }, json);
    Ok(())
}
