use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("State directory cannot be empty")]
    EmptyStateDir,

    #[error("Invalid lock ttl_minutes: {0}. Must be at least 1")]
    InvalidLockTtl(u64),

    #[error("Invalid {0}: cannot be 0")]
    ZeroAttempts(&'static str),

    #[error("Invalid verification backoff: base_delay_secs ({0}) must not exceed max_delay_secs ({1})")]
    InvalidBackoff(u64, u64),

    #[error("Executor command cannot be empty")]
    EmptyExecutorCommand,

    #[error("Invalid github.repo '{0}'. Expected owner/name")]
    InvalidRepo(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .conductor/config.yaml (project config)
    /// 3. .conductor/local.yaml (project local overrides, optional)
    /// 4. Environment variables (CONDUCTOR_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`] with `.conductor/` resolved under `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(".conductor");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring the environment.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }
        if config.state_dir.is_empty() {
            return Err(ConfigError::EmptyStateDir);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.lock.ttl_minutes == 0 {
            return Err(ConfigError::InvalidLockTtl(config.lock.ttl_minutes));
        }

        if config.retry.test_max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("retry.test_max_attempts"));
        }
        if config.retry.lint_max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("retry.lint_max_attempts"));
        }
        if config.verification.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts("verification.max_attempts"));
        }
        if config.verification.base_delay_secs > config.verification.max_delay_secs {
            return Err(ConfigError::InvalidBackoff(
                config.verification.base_delay_secs,
                config.verification.max_delay_secs,
            ));
        }

        if config.executor.command.trim().is_empty() {
            return Err(ConfigError::EmptyExecutorCommand);
        }

        if let Some(repo) = &config.github.repo {
            let well_formed = matches!(
                repo.split_once('/'),
                Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
            );
            if !well_formed {
                return Err(ConfigError::InvalidRepo(repo.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::LockScope;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".conductor/conductor.db");
        assert_eq!(config.lock.ttl_minutes, 120);
        assert_eq!(config.preflight.cooldown_minutes, 60);
        assert_eq!(config.verification.max_attempts, 5);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
lock:
  ttl_minutes: 30
  scope: per_phase
retry:
  test_max_attempts: 5
github:
  repo: acme/widgets
logging:
  level: debug
  format: pretty
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.lock.ttl_minutes, 30);
        assert_eq!(config.lock.scope, LockScope::PerPhase);
        assert_eq!(config.retry.test_max_attempts, 5);
        assert_eq!(config.retry.lint_max_attempts, 3);
        assert_eq!(config.github.repo.as_deref(), Some("acme/widgets"));
        assert_eq!(config.logging.format, "pretty");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogFormat(_))));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyDatabasePath)));
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = Config::default();
        config.lock.ttl_minutes = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLockTtl(0))));
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.verification.max_attempts = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroAttempts("verification.max_attempts"))
        ));

        let mut config = Config::default();
        config.retry.lint_max_attempts = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::ZeroAttempts(_))));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.verification.base_delay_secs = 60;
        config.verification.max_delay_secs = 10;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidBackoff(60, 10))));
    }

    #[test]
    fn test_validate_repo_shape() {
        for bad in ["widgets", "acme/", "/widgets", "acme/widgets/extra"] {
            let mut config = Config::default();
            config.github.repo = Some(bad.to_string());
            assert!(
                matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidRepo(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_hierarchical_merging() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(".conductor");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.yaml"), "lock:\n  ttl_minutes: 30\nlogging:\n  level: info\n  format: json\n")
            .unwrap();
        std::fs::write(dir.join("local.yaml"), "logging:\n  level: debug\n").unwrap();

        temp_env::with_vars(
            [("CONDUCTOR_LOCK__TTL_MINUTES", Some("45")), ("CONDUCTOR_STATE_DIR", Some("/tmp/state"))],
            || {
                let config = ConfigLoader::load_from_dir(root.path()).unwrap();
                assert_eq!(config.lock.ttl_minutes, 45, "Environment should win");
                assert_eq!(config.logging.level, "debug", "Local override should win for nested fields");
                assert_eq!(config.logging.format, "json", "Base value should persist when not overridden");
                assert_eq!(config.state_dir, "/tmp/state");
            },
        );
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(".conductor");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.yaml"), "lock:\n  ttl_minutes: 0\n").unwrap();

        temp_env::with_vars_unset(["CONDUCTOR_LOCK__TTL_MINUTES"], || {
            let err = ConfigLoader::load_from_dir(root.path()).unwrap_err();
            assert!(err.to_string().contains("ttl_minutes"));
        });
    }
}
