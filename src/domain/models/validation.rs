use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult, ValidationStage};

use super::phase::PhaseName;

/// Outcome of a contract check. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new(), warnings: Vec::new() }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Convert into `ValidationFailed` when invalid.
    pub fn into_result(self, phase: PhaseName, stage: ValidationStage) -> DomainResult<Self> {
        if self.is_valid {
            Ok(self)
        } else {
            Err(DomainError::ValidationFailed { phase, stage, errors: self.errors })
        }
    }
}
