//! Cheap precondition checks run before any attempt starts or resumes.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::lock_manager::WorkflowLockManager;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{Clock, IssueProvider};

/// Outcome of a preflight run. Every failing check contributes a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub allowed: bool,
    pub reasons: Vec<String>,
}

impl PreflightReport {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self { allowed: reasons.is_empty(), reasons }
    }
}

/// Decides whether a target may start a new attempt.
pub struct PreflightGate {
    locks: Arc<WorkflowLockManager>,
    provider: Option<Arc<dyn IssueProvider>>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

impl PreflightGate {
    pub fn new(locks: Arc<WorkflowLockManager>, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self { locks, provider: None, clock, cooldown }
    }

    /// Enable the remote checks. Without a provider only the lock check runs.
    pub fn with_provider(mut self, provider: Arc<dyn IssueProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Run all checks and collect every failure.
    pub async fn check(&self, parent_target: &str, override_cooldown: bool) -> DomainResult<PreflightReport> {
        let mut reasons = Vec::new();

        if let Some(provider) = &self.provider {
            let status = provider.target_status(parent_target).await?;
            if status.is_resolved() {
                reasons.push(format!("target {parent_target} is already closed by a merged result"));
            }

            let competing = provider.competing_results(parent_target).await?;
            if !competing.is_empty() {
                let numbers: Vec<String> = competing.iter().map(|pr| format!("#{}", pr.number)).collect();
                reasons.push(format!("open competing results exist: {}", numbers.join(", ")));
            }
        }

        let lock = self.locks.is_locked(parent_target).await?;
        if lock.locked {
            let holder = lock.holder.map(|h| h.to_string()).unwrap_or_default();
            reasons.push(format!("target is locked by attempt {holder}"));
        }

        if override_cooldown {
            info!(parent_target = %parent_target, "Cooldown check overridden");
        } else if let Some(reason) = self.cooldown_reason(parent_target).await? {
            reasons.push(reason);
        }

        let report = PreflightReport::from_reasons(reasons);
        if report.allowed {
            info!(parent_target = %parent_target, "Preflight passed");
        } else {
            warn!(parent_target = %parent_target, reasons = ?report.reasons, "Preflight rejected");
        }
        Ok(report)
    }

    /// [`Self::check`], turning a rejection into [`DomainError::PreflightRejected`].
    pub async fn require(&self, parent_target: &str, override_cooldown: bool) -> DomainResult<()> {
        let report = self.check(parent_target, override_cooldown).await?;
        if report.allowed {
            Ok(())
        } else {
            Err(DomainError::PreflightRejected {
                target: parent_target.to_string(),
                reasons: report.reasons,
            })
        }
    }

    async fn cooldown_reason(&self, parent_target: &str) -> DomainResult<Option<String>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };
        let Some(last_marker) = provider.last_status_marker(parent_target).await? else {
            return Ok(None);
        };

        let cooldown = chrono::Duration::from_std(self.cooldown)
            .map_err(|e| DomainError::ConfigError(format!("Cooldown out of range: {e}")))?;
        let elapsed = self.clock.now() - last_marker;
        if elapsed >= cooldown {
            return Ok(None);
        }
        let remaining = (cooldown - elapsed).num_minutes() + 1;
        Ok(Some(format!(
            "cooldown active: last status posted {} minutes ago, {remaining} more minutes required",
            elapsed.num_minutes()
        )))
    }
}
