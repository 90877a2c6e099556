//! Phase executor that shells out to an external coding-agent process.
//!
//! The process receives the phase, target and attempt as arguments and
//! environment variables. Its exit code is the phase result. A structured
//! result may be reported by printing a single JSON line of the form
//! `{"phase_result": {...}}` to stdout; the last such line wins.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutorConfig, PhaseOutput};
use crate::domain::ports::{PhaseExecution, PhaseExecutor, PhaseRequest};

#[derive(Debug, Deserialize)]
struct ResultLine {
    phase_result: ReportedResult,
}

#[derive(Debug, Default, Deserialize)]
struct ReportedResult {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    output: Option<PhaseOutput>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    resolved_target: Option<String>,
}

/// Runs the configured command for each phase request.
pub struct ProcessPhaseExecutor {
    config: ExecutorConfig,
}

impl ProcessPhaseExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, request: &PhaseRequest) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.extend([
            "--phase".to_string(),
            request.phase.as_str().to_string(),
            "--target".to_string(),
            request.parent_target.clone(),
            "--attempt".to_string(),
            request.attempt_id.to_string(),
            "--iteration".to_string(),
            request.iteration.to_string(),
        ]);
        if let Some(ref resolved) = request.resolved_target {
            args.push("--resolved-target".to_string());
            args.push(resolved.clone());
        }
        if request.resume {
            args.push("--resume".to_string());
        }
        args
    }

    fn parse_result_line(line: &str) -> Option<ReportedResult> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str::<ResultLine>(trimmed).ok().map(|l| l.phase_result)
    }
}

#[async_trait]
impl PhaseExecutor for ProcessPhaseExecutor {
    async fn execute(&self, request: &PhaseRequest) -> DomainResult<PhaseExecution> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("CONDUCTOR_PHASE", request.phase.as_str())
            .env("CONDUCTOR_TARGET", &request.parent_target)
            .env("CONDUCTOR_ATTEMPT_ID", request.attempt_id.to_string())
            .env("CONDUCTOR_ITERATION", request.iteration.to_string());
        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| DomainError::ExecutorError(format!("Failed to spawn {}: {e}", self.config.command)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DomainError::ExecutorError("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DomainError::ExecutorError("Failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                text.push_str(&line);
                text.push('\n');
            }
            text
        });

        let mut reported = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(result) = Self::parse_result_line(&line) {
                reported = Some(result);
            } else {
                tracing::trace!(phase = %request.phase, "{line}");
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DomainError::ExecutorError(format!("Failed to wait for process: {e}")))?;
        let error_text = stderr_task.await.unwrap_or_default();

        let exit_code = status.code().unwrap_or(-1);
        let reported = reported.unwrap_or_default();
        let message = match reported.message {
            Some(message) => message,
            None if exit_code != 0 && !error_text.trim().is_empty() => error_text.trim().to_string(),
            None if exit_code != 0 => format!("Process exited with code: {exit_code}"),
            None => String::new(),
        };

        tracing::debug!(
            phase = %request.phase,
            attempt_id = %request.attempt_id,
            exit_code,
            has_output = reported.output.is_some(),
            "phase executor finished"
        );

        Ok(PhaseExecution {
            exit_code,
            message,
            output: reported.output,
            metadata: reported.metadata,
            resolved_target: reported.resolved_target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PhaseName;
    use uuid::Uuid;

    fn request() -> PhaseRequest {
        PhaseRequest {
            phase: PhaseName::Test,
            parent_target: "42".into(),
            resolved_target: None,
            attempt_id: Uuid::new_v4(),
            iteration: 2,
            resume: true,
        }
    }

    #[test]
    fn test_build_args() {
        let executor = ProcessPhaseExecutor::new(ExecutorConfig {
            args: vec!["run".into()],
            ..Default::default()
        });
        let req = request();
        let args = executor.build_args(&req);
        assert_eq!(args[0], "run");
        assert!(args.windows(2).any(|w| w[0] == "--phase" && w[1] == "test"));
        assert!(args.windows(2).any(|w| w[0] == "--iteration" && w[1] == "2"));
        assert_eq!(args.last().map(String::as_str), Some("--resume"));
    }

    #[test]
    fn test_parse_result_line() {
        let line = r#"{"phase_result": {"output": {"phase": "test", "passed": 3, "failed": 1}, "metadata": {"port": 4100}}}"#;
        let parsed = ProcessPhaseExecutor::parse_result_line(line).unwrap();
        assert_eq!(parsed.output.unwrap().failure_count(), 1);
        assert_eq!(parsed.metadata["port"], 4100);

        assert!(ProcessPhaseExecutor::parse_result_line("running tests...").is_none());
        assert!(ProcessPhaseExecutor::parse_result_line(r#"{"other": 1}"#).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executes_shell_process() {
        let executor = ProcessPhaseExecutor::new(ExecutorConfig {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                r#"echo working; echo '{"phase_result": {"output": {"phase": "test", "passed": 5, "failed": 0}}}'"#.into(),
                "agent".into(),
            ],
            ..Default::default()
        });

        let execution = executor.execute(&request()).await.unwrap();
        assert!(execution.is_success());
        assert_eq!(execution.failure_count(), 0);
        assert!(execution.output.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_message_from_stderr() {
        let executor = ProcessPhaseExecutor::new(ExecutorConfig {
            command: "sh".into(),
            args: vec!["-c".into(), "echo 'tests exploded' >&2; exit 3".into(), "agent".into()],
            ..Default::default()
        });

        let execution = executor.execute(&request()).await.unwrap();
        assert_eq!(execution.exit_code, 3);
        assert_eq!(execution.message, "tests exploded");
    }

    #[tokio::test]
    async fn test_missing_binary_is_executor_error() {
        let executor = ProcessPhaseExecutor::new(ExecutorConfig {
            command: "/definitely/not/a/real/binary".into(),
            ..Default::default()
        });
        let err = executor.execute(&request()).await.unwrap_err();
        assert!(matches!(err, DomainError::ExecutorError(_)));
    }
}
