use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{PhaseName, PhaseOutput};

/// One invocation of the external phase body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRequest {
    pub phase: PhaseName,
    pub parent_target: String,
    pub resolved_target: Option<String>,
    pub attempt_id: Uuid,
    /// 1-based iteration within a fix loop.
    pub iteration: u32,
    /// Whether partial results from a crashed run were kept.
    pub resume: bool,
}

/// What the executor reported back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub exit_code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub output: Option<PhaseOutput>,
    /// Extra execution metadata merged into the attempt's state.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// External id learnt during the phase, e.g. a created issue number.
    #[serde(default)]
    pub resolved_target: Option<String>,
}

impl PhaseExecution {
    pub fn success(output: PhaseOutput) -> Self {
        Self { exit_code: 0, output: Some(output), ..Default::default() }
    }

    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        Self { exit_code, message: message.into(), ..Default::default() }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Failure count from the typed output; a failed run without output counts as one.
    pub fn failure_count(&self) -> u32 {
        match &self.output {
            Some(output) => output.failure_count(),
            None if self.is_success() => 0,
            None => 1,
        }
    }
}

/// External process that performs the actual phase work.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, request: &PhaseRequest) -> DomainResult<PhaseExecution>;
}
