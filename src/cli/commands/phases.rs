//! Phase-level commands: enqueue, status, run, retry.

use anyhow::{Context, Result};
use serde::Serialize;

use super::{parse_queue_id, TransitionPrinter};
use crate::cli::output::{list_table, output, short_id, truncate, CommandOutput};
use crate::cli::service::AppContext;
use crate::domain::models::{PhaseName, PhaseRecord, PhaseSpec};
use crate::services::PhaseOutcome;

#[derive(Debug, Serialize)]
pub struct PhaseRecordOutput {
    pub queue_id: String,
    pub parent_target: String,
    pub phase_number: i64,
    pub phase: String,
    pub status: String,
    pub depends_on_phase: Option<i64>,
    pub attempt_id: Option<String>,
    pub resolved_target: Option<String>,
    pub error: Option<String>,
    pub updated_at: String,
}

impl From<&PhaseRecord> for PhaseRecordOutput {
    fn from(record: &PhaseRecord) -> Self {
        Self {
            queue_id: record.queue_id.to_string(),
            parent_target: record.parent_target.clone(),
            phase_number: record.phase_number,
            phase: record.phase_name.as_str().to_string(),
            status: record.status.as_str().to_string(),
            depends_on_phase: record.depends_on_phase,
            attempt_id: record.attempt_id.map(|id| id.to_string()),
            resolved_target: record.resolved_target.clone(),
            error: record.error_message.clone(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

impl CommandOutput for PhaseRecordOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Phase:      {} ({}/{})", self.phase, self.phase_number, PhaseName::ALL.len()),
            format!("Queue ID:   {}", self.queue_id),
            format!("Target:     {}", self.parent_target),
            format!("Status:     {}", self.status),
        ];
        if let Some(dep) = self.depends_on_phase {
            lines.push(format!("Depends on: phase {dep}"));
        }
        if let Some(ref attempt) = self.attempt_id {
            lines.push(format!("Attempt:    {attempt}"));
        }
        if let Some(ref resolved) = self.resolved_target {
            lines.push(format!("Resolved:   {resolved}"));
        }
        if let Some(ref error) = self.error {
            lines.push(format!("Error:      {error}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PhaseListOutput {
    pub parent_target: String,
    pub phases: Vec<PhaseRecordOutput>,
    pub total: usize,
}

impl PhaseListOutput {
    fn new(parent_target: &str, records: &[PhaseRecord]) -> Self {
        Self {
            parent_target: parent_target.to_string(),
            phases: records.iter().map(PhaseRecordOutput::from).collect(),
            total: records.len(),
        }
    }
}

impl CommandOutput for PhaseListOutput {
    fn to_human(&self) -> String {
        if self.phases.is_empty() {
            return format!("No phases enqueued for {}.", self.parent_target);
        }

        let mut table = list_table(&["#", "phase", "status", "dep", "queue id", "error"]);
        for phase in &self.phases {
            table.add_row(vec![
                phase.phase_number.to_string(),
                phase.phase.clone(),
                phase.status.clone(),
                phase.depends_on_phase.map_or_else(|| "-".to_string(), |d| d.to_string()),
                phase.queue_id.clone(),
                phase.error.as_deref().map_or_else(String::new, |e| truncate(e, 48)),
            ]);
        }
        format!("{} phase(s) for {}:\n{table}", self.total, self.parent_target)
    }
}

#[derive(Debug, Serialize)]
pub struct PhaseOutcomeOutput {
    pub record: PhaseRecordOutput,
    pub skipped: bool,
    pub iterations: u32,
    pub warnings: Vec<String>,
}

impl From<&PhaseOutcome> for PhaseOutcomeOutput {
    fn from(outcome: &PhaseOutcome) -> Self {
        Self {
            record: PhaseRecordOutput::from(&outcome.record),
            skipped: outcome.skipped,
            iterations: outcome.iterations,
            warnings: outcome.warnings.clone(),
        }
    }
}

impl CommandOutput for PhaseOutcomeOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if self.skipped {
            lines.push(format!("Phase {} already completed; nothing to do.", self.record.phase));
        } else {
            lines.push(format!(
                "Phase {} {} after {} iteration(s).",
                self.record.phase, self.record.status, self.iterations
            ));
        }
        for warning in &self.warnings {
            lines.push(format!("  warning: {warning}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct EnqueueOutput {
    pub parent_target: String,
    pub queue_ids: Vec<String>,
    pub phases: Vec<String>,
}

impl CommandOutput for EnqueueOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Enqueued {} phase(s) for {}:", self.queue_ids.len(), self.parent_target)];
        for (phase, id) in self.phases.iter().zip(&self.queue_ids) {
            lines.push(format!("  {phase:<10} {id}"));
        }
        lines.join("\n")
    }
}

/// Phase names as given on the command line, in workflow order. Empty means
/// the full chain.
pub(crate) fn parse_phases(raw: &[String]) -> Result<Vec<PhaseName>> {
    if raw.is_empty() {
        return Ok(PhaseName::ALL.to_vec());
    }
    let mut phases = raw
        .iter()
        .map(|name| {
            PhaseName::from_str(name.trim()).with_context(|| {
                let known: Vec<&str> = PhaseName::ALL.iter().map(PhaseName::as_str).collect();
                format!("Unknown phase '{name}'. Expected one of: {}", known.join(", "))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    phases.sort_by_key(PhaseName::ordinal);
    phases.dedup();
    Ok(phases)
}

pub async fn handle_enqueue(context: &AppContext, target: &str, raw_phases: &[String], json: bool) -> Result<()> {
    let phases = parse_phases(raw_phases)?;
    let specs = PhaseSpec::chain(&phases);
    let ids = context
        .service
        .enqueue(target, &specs)
        .await
        .with_context(|| format!("Failed to enqueue phases for {target}"))?;

    let out = EnqueueOutput {
        parent_target: target.to_string(),
        queue_ids: ids.iter().map(ToString::to_string).collect(),
        phases: phases.iter().map(|p| p.as_str().to_string()).collect(),
    };
    output(&out, json);
    Ok(())
}

pub async fn handle_status(context: &AppContext, target: &str, json: bool) -> Result<()> {
    let records = context.service.status(target).await.context("Failed to load phase records")?;
    output(&PhaseListOutput::new(target, &records), json);
    Ok(())
}

pub async fn handle_run(context: &AppContext, queue_id: &str, override_cooldown: bool, json: bool) -> Result<()> {
    let queue_id = parse_queue_id(queue_id)?;
    let printer = TransitionPrinter::start(&context.events, json);
    let result = context.service.request_execution(queue_id, override_cooldown).await;
    if let Some(printer) = printer {
        printer.finish().await;
    }

    let outcome = result.with_context(|| format!("Failed to run phase {}", short_id(&queue_id)))?;
    output(&PhaseOutcomeOutput::from(&outcome), json);
    Ok(())
}

pub async fn handle_retry(context: &AppContext, queue_id: &str, json: bool) -> Result<()> {
    let queue_id = parse_queue_id(queue_id)?;
    let record = context
        .service
        .retry(queue_id)
        .await
        .with_context(|| format!("Failed to retry phase {}", short_id(&queue_id)))?;
    output(&PhaseRecordOutput::from(&record), json);
    Ok(())
}
