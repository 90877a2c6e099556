//! Exponential-backoff confirmation of eventually consistent remote state.
//!
//! A probe answers one of three ways. `Confirmed` and `Absent` are both
//! definitive and end the loop at once; only `NotYetVisible` (or a probe
//! error) is retried. Running out of attempts is reported as
//! [`DomainError::VerificationInconclusive`], never as a confirmed failure.

use backoff::backoff::Backoff;
use backoff::{Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::VerificationConfig;

/// What a single probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Confirmed(T),
    /// Not observable yet; may still propagate.
    NotYetVisible(String),
    /// Definitively absent. No amount of waiting will change it.
    Absent(String),
}

/// Definitive answer after retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Confirmed(T),
    Absent(String),
}

/// Bounds and delays of the confirmation backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&VerificationConfig::default())
    }
}

impl From<&VerificationConfig> for RetryPolicy {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Doubling delays starting at `base_delay`, capped at `max_delay`, no jitter.
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_delay.max(self.base_delay))
            .with_max_elapsed_time(None)
            .build()
    }

    /// The delays that would be slept between attempts.
    pub fn delays(&self) -> Vec<Duration> {
        let mut backoff = self.backoff();
        (1..self.max_attempts.max(1)).filter_map(|_| backoff.next_backoff()).collect()
    }
}

/// Polls an eventually consistent check until it settles.
#[derive(Debug, Clone, Default)]
pub struct VerificationRetrier {
    policy: RetryPolicy,
}

impl VerificationRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Call `probe` until it gives a definitive answer or attempts run out.
    pub async fn retry<T, F, Fut>(&self, check: &str, mut probe: F) -> DomainResult<Verdict<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<Probe<T>>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        let operation = || {
            attempt += 1;
            let current = attempt;
            let pending = probe();
            async move {
                let reason = match pending.await {
                    Ok(Probe::Confirmed(value)) => {
                        info!(check, attempt = current, "Verification confirmed");
                        return Ok(Verdict::Confirmed(value));
                    }
                    Ok(Probe::Absent(reason)) => {
                        info!(check, attempt = current, reason = %reason, "Verification found definitive absence");
                        return Ok(Verdict::Absent(reason));
                    }
                    Ok(Probe::NotYetVisible(reason)) => reason,
                    Err(e) => e.to_string(),
                };
                debug!(check, attempt = current, reason = %reason, "Verification not yet visible");
                if current >= max_attempts {
                    Err(BackoffError::permanent(reason))
                } else {
                    Err(BackoffError::transient(reason))
                }
            }
        };

        let notify = |reason: String, delay: Duration| {
            debug!(check, delay_ms = delay.as_millis() as u64, reason = %reason, "Retrying verification");
        };

        match backoff::future::retry_notify(self.policy.backoff(), operation, notify).await {
            Ok(verdict) => Ok(verdict),
            Err(last_reason) => {
                warn!(check, attempts = max_attempts, last_reason = %last_reason, "Verification inconclusive");
                Err(DomainError::VerificationInconclusive {
                    check: check.to_string(),
                    attempts: max_attempts,
                })
            }
        }
    }
}
