//! Wiring: builds the workflow service and its collaborators from [`Config`].

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::executor::ProcessPhaseExecutor;
use crate::adapters::fs::{FileExecutionStateStore, StateCleanup};
use crate::adapters::github::{GitHubClient, GitHubIssueProvider};
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteCoordinationStore, SqliteLockStore,
};
use crate::domain::models::{Config, GithubConfig};
use crate::domain::ports::{Clock, IssueProvider, SystemClock};
use crate::services::{
    EventBus, EventBusConfig, PhaseOrchestrator, PhaseOrchestratorConfig, PreflightGate, RetryPolicy,
    StateValidator, VerificationRetrier, WorkflowLockManager, WorkflowService,
};

/// Everything a command needs.
pub struct AppContext {
    pub service: Arc<WorkflowService>,
    pub events: Arc<EventBus>,
}

pub async fn build_context(config: &Config) -> Result<AppContext> {
    let pool_config = PoolConfig { max_connections: config.database.max_connections, ..Default::default() };
    let pool = initialize_database(&database_url(&config.database.path), Some(pool_config))
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;

    let events = Arc::new(EventBus::new(EventBusConfig::default()));
    let coordination = Arc::new(SqliteCoordinationStore::new(pool.clone()).with_broadcaster(events.clone()));
    let state = Arc::new(FileExecutionStateStore::new(&config.state_dir));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let locks = Arc::new(WorkflowLockManager::new(
        Arc::new(SqliteLockStore::new(pool)),
        clock.clone(),
        config.lock.ttl(),
    ));

    let workspace_root = config.executor.working_dir.as_ref().map_or_else(|| PathBuf::from("."), PathBuf::from);
    let validator = Arc::new(StateValidator::new(coordination.clone(), state.clone(), workspace_root));
    let executor = Arc::new(ProcessPhaseExecutor::new(config.executor.clone()));

    let orchestrator_config = PhaseOrchestratorConfig {
        phase_timeout: config.executor.timeout(),
        test_max_attempts: config.retry.test_max_attempts,
        lint_max_attempts: config.retry.lint_max_attempts,
    };
    let mut orchestrator = PhaseOrchestrator::new(
        coordination.clone(),
        state.clone(),
        locks.clone(),
        validator,
        executor,
        orchestrator_config,
    )
    .with_retrier(VerificationRetrier::new(RetryPolicy::from(&config.verification)))
    .with_cleanup(Arc::new(StateCleanup::new(state.clone())));

    let cooldown = Duration::from_secs(config.preflight.cooldown_minutes * 60);
    let mut preflight = PreflightGate::new(locks.clone(), clock, cooldown);

    if let Some(provider) = build_provider(&config.github) {
        orchestrator = orchestrator.with_provider(provider.clone());
        preflight = preflight.with_provider(provider);
    }

    let service = WorkflowService::new(coordination, state, locks, preflight, Arc::new(orchestrator))
        .with_lock_scope(config.lock.scope);

    Ok(AppContext { service: Arc::new(service), events })
}

/// The issue provider, when a repository is configured and a token is available.
fn build_provider(config: &GithubConfig) -> Option<Arc<dyn IssueProvider>> {
    let repo = config.repo.as_ref()?;
    match GitHubClient::from_env(&config.api_url, &config.token_env) {
        Ok(client) => {
            info!(repo = %repo, "GitHub issue provider enabled");
            Some(Arc::new(GitHubIssueProvider::new(client, repo).with_actor(config.actor.clone())))
        }
        Err(reason) => {
            warn!(repo = %repo, reason = %reason, "GitHub issue provider disabled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_disabled_without_repo() {
        assert!(build_provider(&GithubConfig::default()).is_none());
    }

    #[test]
    fn test_provider_disabled_without_token() {
        let config = GithubConfig {
            repo: Some("acme/widgets".into()),
            token_env: "CONDUCTOR_TEST_MISSING_TOKEN".into(),
            ..Default::default()
        };
        temp_env::with_var_unset("CONDUCTOR_TEST_MISSING_TOKEN", || {
            assert!(build_provider(&config).is_none());
        });
    }

    #[tokio::test]
    async fn test_context_builds_against_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("conductor.db").to_string_lossy().into_owned();
        config.state_dir = dir.path().join("state").to_string_lossy().into_owned();

        let context = build_context(&config).await.unwrap();
        assert!(context.service.status("42").await.unwrap().is_empty());
        assert!(!context.service.lock_status("42").await.unwrap().locked);
    }
}
